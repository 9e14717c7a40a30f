//! Pre-execution safety screen for raw commands.
//!
//! The blocklist is a fixed set of case-insensitive substrings plus a few
//! regex patterns. It is defence in depth: the primary defence is that raw
//! commands are spawned from an argv vector with no shell (see the
//! executor), so metacharacters never reach an interpreter.

use std::sync::OnceLock;

use regex::Regex;

/// Substring tokens that are never allowed in a raw command, matched
/// case-insensitively. The matched token is reported back verbatim.
const BLOCKED_TOKENS: &[&str] = &[
    // Destructive file operations
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    "rm -rf .",
    "rm -fr",
    "rmdir /s",
    "del /s /q",
    "format c:",
    "mkfs",
    "dd if=",
    "diskpart",
    "shred",
    // Power control
    "shutdown",
    "reboot",
    "poweroff",
    "halt",
    "init 0",
    "init 6",
    // User / permission mutation
    "passwd",
    "useradd",
    "userdel",
    "usermod",
    "groupadd",
    "groupdel",
    "chmod 777",
    "chown -r",
    "visudo",
    // Injection vectors
    "`",
    "$(",
    "base64 -d |",
    "| base64 -d",
    "eval $(",
    // Reverse shells / backdoors
    "nc -l",
    "ncat -l",
    "nc -e",
    "ncat -e",
    "bash -i",
    "/dev/tcp/",
    // Fork bomb
    ":(){ :|:& };:",
    // History / log tampering
    "history -c",
    "history -w",
    "> /var/log",
];

/// Regex patterns for shapes a substring match cannot express, paired with
/// the token reported on a hit.
fn blocked_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Redirection into raw block devices.
            (r">\s*/dev/(sd|hd|nvme)", "> /dev/<block-device>"),
            // Privileged variants of the destructive set.
            (r"(?i)sudo\s+(rm|dd|mkfs|fdisk|parted|chown|chmod)", "sudo <destructive>"),
            (r"(?i)\bfdisk\b", "fdisk"),
        ]
        .iter()
        .filter_map(|(pat, token)| Regex::new(pat).ok().map(|re| (re, *token)))
        .collect()
    })
}

/// Screen a raw command against the blocklist.
///
/// Returns the matched token when the command must be refused, `None` when
/// it may proceed to argv parsing. No process is ever spawned on a hit.
pub fn screen_command(command: &str) -> Option<&'static str> {
    let lowered = command.to_lowercase();
    for token in BLOCKED_TOKENS {
        if lowered.contains(token) {
            return Some(token);
        }
    }
    for (re, token) in blocked_patterns() {
        if re.is_match(command) {
            return Some(token);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_delete_is_blocked() {
        assert_eq!(screen_command("rm -rf /"), Some("rm -rf /"));
        assert_eq!(screen_command("sudo rm -rf /"), Some("rm -rf /"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(screen_command("SHUTDOWN /s /t 0"), Some("shutdown"));
        assert_eq!(screen_command("MkFs.ext4 /dev/sda1"), Some("mkfs"));
    }

    #[test]
    fn command_substitution_is_blocked() {
        assert!(screen_command("echo `id`").is_some());
        assert!(screen_command("echo $(whoami)").is_some());
    }

    #[test]
    fn block_device_redirection_is_blocked() {
        assert_eq!(screen_command("cat image.iso > /dev/sda"), Some("> /dev/<block-device>"));
        assert!(screen_command("dd of=x >/dev/nvme0n1").is_some());
    }

    #[test]
    fn sudo_destructive_variants_are_blocked() {
        assert!(screen_command("sudo dd of=/dev/zero").is_some());
        assert!(screen_command("sudo chown nobody /etc").is_some());
    }

    #[test]
    fn decode_and_pipe_is_blocked() {
        assert!(screen_command("echo aGk= | base64 -d | sh").is_some());
    }

    #[test]
    fn ordinary_diagnostics_pass() {
        for cmd in ["ps aux", "df -h", "uptime", "ip addr show", "cat /etc/os-release"] {
            assert_eq!(screen_command(cmd), None, "{cmd} should pass");
        }
    }

    #[test]
    fn reported_token_names_the_match() {
        let token = screen_command("nc -l -p 4444").unwrap();
        assert_eq!(token, "nc -l");
    }
}
