//! Sandboxed tool and command execution on the endpoint.
//!
//! Two entry points: [`Executor::execute`] runs a registered tool after
//! validating its arguments against the declared schema, and
//! [`Executor::execute_raw`] runs an arbitrary command line under the
//! blocklist screen. Raw commands are parsed into an argv vector and
//! spawned with no shell, a scrubbed environment, and the user's home as
//! working directory; metacharacters never reach an interpreter.

use std::{path::PathBuf, sync::Arc, time::Duration, time::Instant};

use serde_json::Value;
use tokio::process::Command;

use crate::security::{Role, SlidingWindow, screen_command, sanitize_output};
use crate::tools::{ToolRegistry, ToolResult, validate_arguments};

/// Raw commands never run longer than this, whatever the caller asked for.
const MAX_RAW_TIMEOUT_SECS: u64 = 300;

/// Roles below this floor may not use raw command execution at all; the
/// blocklist is only the second line of defence.
const RAW_COMMAND_MIN_ROLE: Role = Role::HumanAgent;

/// Tunables for the executor, sourced from the endpoint config.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Default deadline for raw commands when the frame does not carry one.
    pub command_timeout_secs: u64,
    /// Output byte budget before truncation.
    pub max_output_bytes: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            max_output_bytes: 64 * 1024,
            rate_limit_requests: 30,
            rate_limit_window_secs: 60,
        }
    }
}

pub struct Executor {
    registry: Arc<ToolRegistry>,
    limiter: SlidingWindow,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, config: ExecutorConfig) -> Self {
        let limiter = SlidingWindow::new(config.rate_limit_window_secs, config.rate_limit_requests);
        Self {
            registry,
            limiter,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a registered tool by name.
    ///
    /// Arguments are validated against the tool's schema first; on mismatch
    /// the handler is never invoked. The policy's `timeout_seconds` is a
    /// hard wall-clock deadline.
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolResult {
        let started = Instant::now();

        let Some((tool, policy)) = self.registry.lookup(name) else {
            return ToolResult::failure(format!("tool '{name}' not found"));
        };

        let arguments = if arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            arguments
        };

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &arguments) {
            return ToolResult::invalid_arguments(reason)
                .with_elapsed_ms(elapsed_ms(started));
        }

        let deadline = Duration::from_secs(policy.timeout_seconds);
        let result = match tokio::time::timeout(deadline, tool.execute(arguments)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::failure(format!("tool '{name}' failed: {e}")),
            Err(_) => {
                log::warn!("tool '{name}' exceeded its {}s deadline", policy.timeout_seconds);
                ToolResult::timeout(format!(
                    "tool '{name}' timed out after {}s",
                    policy.timeout_seconds
                ))
            }
        };

        self.finish(result, started)
    }

    /// Execute a raw command line under the safety screen.
    ///
    /// Order of checks matters: the role floor and blocklist run before the
    /// rate limiter, so refused commands never consume budget.
    pub async fn execute_raw(&self, command: &str, timeout_secs: u64, role: Role) -> ToolResult {
        let started = Instant::now();

        if role < RAW_COMMAND_MIN_ROLE {
            return ToolResult::unauthorized(format!(
                "raw command execution requires at least role {RAW_COMMAND_MIN_ROLE}, provided {role}"
            ));
        }

        if let Some(token) = screen_command(command) {
            log::warn!("blocked raw command (token '{token}')");
            return ToolResult::blocked(format!("command matched blocked token '{token}'"))
                .with_elapsed_ms(elapsed_ms(started));
        }

        if !self.limiter.try_record() {
            return ToolResult::failure(format!(
                "rate limit exceeded ({})",
                self.limiter.describe()
            ));
        }

        let argv = match shell_words::split(command) {
            Ok(argv) if !argv.is_empty() => argv,
            Ok(_) => return ToolResult::invalid_arguments("command is empty"),
            Err(e) => {
                return ToolResult::invalid_arguments(format!("command parse failed: {e}"));
            }
        };

        let program = match which::which(&argv[0]) {
            Ok(path) => path,
            Err(_) => {
                return ToolResult::failure(format!("command not found: {}", argv[0]))
                    .with_elapsed_ms(elapsed_ms(started));
            }
        };

        let effective = match timeout_secs {
            0 => self.config.command_timeout_secs,
            t => t.min(MAX_RAW_TIMEOUT_SECS),
        };

        let result = self
            .spawn_and_wait(program, &argv[1..], Duration::from_secs(effective))
            .await;
        self.finish(result, started)
    }

    async fn spawn_and_wait(
        &self,
        program: PathBuf,
        args: &[String],
        deadline: Duration,
    ) -> ToolResult {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(safe_environment())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(home) = dirs::home_dir() {
            cmd.current_dir(home);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolResult::failure(format!("failed to spawn process: {e}")),
        };

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::failure(format!("process wait failed: {e}")),
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => {
                return ToolResult::timeout(format!(
                    "command timed out after {}s",
                    deadline.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        let combined = if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            format!("STDERR: {stderr}")
        } else {
            format!("{stdout}\nSTDERR: {stderr}")
        };

        let mut result = if output.status.success() {
            ToolResult::success(combined)
        } else {
            let mut r = ToolResult::failure(format!(
                "command exited with code {}",
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ));
            r.output = combined;
            r
        };
        result.metadata.exit_code = exit_code;
        result
    }

    /// Sanitize the output and stamp elapsed time and metadata.
    fn finish(&self, mut result: ToolResult, started: Instant) -> ToolResult {
        let sanitized = sanitize_output(&result.output, self.config.max_output_bytes);
        result.output = sanitized.output;
        result.metadata.truncated |= sanitized.truncated;
        result.metadata.redactions += sanitized.redactions;
        result.with_elapsed_ms(elapsed_ms(started))
    }

    #[cfg(test)]
    pub(crate) fn rate_limit_remaining(&self) -> usize {
        self.limiter.remaining()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// The restricted environment handed to child processes: path lookup,
/// system identification, and temp dirs only.
fn safe_environment() -> Vec<(String, String)> {
    const SAFE_VARS: &[&str] = &[
        "PATH",
        "HOME",
        "LANG",
        "TMPDIR",
        "TEMP",
        "TMP",
        "USER",
        "LOGNAME",
        "USERNAME",
        "HOSTNAME",
        "COMPUTERNAME",
        "SYSTEMROOT",
        "WINDIR",
        "COMSPEC",
        "OS",
        "NUMBER_OF_PROCESSORS",
        "PROCESSOR_ARCHITECTURE",
        // PowerShell module resolution
        "PSModulePath",
    ];
    SAFE_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|v| (var.to_string(), v)))
        .collect()
}
