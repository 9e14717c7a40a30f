//! Live device connections, keyed by device id.
//!
//! Each entry holds the bounded sender feeding that socket's writer task,
//! so per-socket writes are serialized by construction and the registry
//! lock is never held across socket I/O; the sender is cloned out first.
//! At most one connection per device id is current; registering a
//! replacement drops the prior sender, which ends the old writer task and
//! closes its socket.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::audit::AuditLog;
use crate::protocol::Frame;

/// Outbound frames queued per socket before backpressure reaches senders.
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Snapshot of one live connection, for operational inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub since: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

struct DeviceConnection {
    tx: mpsc::Sender<Frame>,
    info: ConnectionInfo,
    /// Distinguishes this registration from a replacement so a stale
    /// socket's cleanup cannot unregister its successor.
    epoch: u64,
}

pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    audit: Arc<AuditLog>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<String, DeviceConnection>,
    next_epoch: u64,
}

impl ConnectionRegistry {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            audit,
        }
    }

    /// Register the writer-queue sender for `device_id`. Any prior entry is
    /// replaced and its sender dropped, closing the old socket. Returns the
    /// registration epoch to pass back to [`ConnectionRegistry::unregister`].
    pub fn register(
        &self,
        device_id: &str,
        user_id: Option<String>,
        tx: mpsc::Sender<Frame>,
    ) -> u64 {
        let now = Utc::now();
        let replaced = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.next_epoch += 1;
            let epoch = inner.next_epoch;
            let prior = inner.connections.insert(
                device_id.to_string(),
                DeviceConnection {
                    tx,
                    info: ConnectionInfo {
                        device_id: device_id.to_string(),
                        user_id,
                        since: now,
                        last_heartbeat: now,
                    },
                    epoch,
                },
            );
            (epoch, prior.is_some())
        };
        let (epoch, was_replacement) = replaced;

        if was_replacement {
            log::info!("device '{device_id}' re-registered; prior socket closed");
            self.audit.record_connection(
                "replaced",
                device_id,
                Some("prior socket closed".to_string()),
            );
        } else {
            log::info!("device '{device_id}' connected");
            self.audit.record_connection("registered", device_id, None);
        }
        epoch
    }

    /// Remove the entry for `device_id`, but only if it still belongs to
    /// `epoch`: a replaced socket's teardown must not evict its successor.
    /// Returns `true` when an entry was actually removed.
    pub fn unregister(&self, device_id: &str, epoch: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.connections.get(device_id) {
                Some(conn) if conn.epoch == epoch => {
                    inner.connections.remove(device_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            log::info!("device '{device_id}' disconnected");
            self.audit.record_connection("unregistered", device_id, None);
        }
        removed
    }

    /// Queue `frame` for `device_id`. Returns `false` immediately when the
    /// device is offline; otherwise waits for queue room (bounded by the
    /// caller's own deadline; the registry never buffers unboundedly).
    pub async fn send_to(&self, device_id: &str, frame: Frame) -> bool {
        let tx = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.connections.get(device_id) {
                Some(conn) => conn.tx.clone(),
                None => return false,
            }
        };
        tx.send(frame).await.is_ok()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .contains_key(device_id)
    }

    pub fn mark_heartbeat(&self, device_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = inner.connections.get_mut(device_id) {
            conn.info.last_heartbeat = Utc::now();
        }
    }

    /// Snapshot of all live connections.
    pub fn all(&self) -> Vec<ConnectionInfo> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<ConnectionInfo> =
            inner.connections.values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        infos
    }

    /// Drop every connection (shutdown). Senders are dropped, which ends
    /// the writer tasks and closes the sockets.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (ConnectionRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(AuditLog::new(dir.path()).unwrap());
        (ConnectionRegistry::new(audit), dir)
    }

    #[tokio::test]
    async fn send_to_offline_device_is_false() {
        let (reg, _dir) = registry();
        assert!(!reg.send_to("d1", Frame::Ping).await);
        assert!(!reg.is_connected("d1"));
    }

    #[tokio::test]
    async fn send_to_reaches_the_registered_queue() {
        let (reg, _dir) = registry();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        reg.register("d1", None, tx);

        assert!(reg.send_to("d1", Frame::Ping).await);
        assert_eq!(rx.recv().await.map(|f| f.frame_type()), Some("ping"));
    }

    #[tokio::test]
    async fn replacement_closes_the_prior_socket() {
        let (reg, _dir) = registry();
        let (tx_old, mut rx_old) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (tx_new, mut rx_new) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        reg.register("d1", None, tx_old);
        reg.register("d1", None, tx_new);

        // Old writer queue is closed (sender dropped by the registry).
        assert_eq!(rx_old.recv().await.map(|f| f.frame_type()), None);

        // New registration receives traffic.
        assert!(reg.send_to("d1", Frame::Ping).await);
        assert_eq!(rx_new.recv().await.map(|f| f.frame_type()), Some("ping"));
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_successor() {
        let (reg, _dir) = registry();
        let (tx_old, _rx_old) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (tx_new, _rx_new) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let old_epoch = reg.register("d1", None, tx_old);
        let _new_epoch = reg.register("d1", None, tx_new);

        assert!(!reg.unregister("d1", old_epoch));
        assert!(reg.is_connected("d1"));
    }

    #[tokio::test]
    async fn unregister_with_current_epoch_removes() {
        let (reg, _dir) = registry();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let epoch = reg.register("d1", None, tx);
        assert!(reg.unregister("d1", epoch));
        assert!(!reg.is_connected("d1"));
    }

    #[tokio::test]
    async fn all_lists_live_connections_sorted() {
        let (reg, _dir) = registry();
        let (tx_b, _rx_b) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (tx_a, _rx_a) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        reg.register("device-b", Some("u2".into()), tx_b);
        reg.register("device-a", None, tx_a);

        let all = reg.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].device_id, "device-a");
        assert_eq!(all[1].device_id, "device-b");
        assert_eq!(all[1].user_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn heartbeat_updates_timestamp() {
        let (reg, _dir) = registry();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        reg.register("d1", None, tx);

        let before = reg.all()[0].last_heartbeat;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.mark_heartbeat("d1");
        assert!(reg.all()[0].last_heartbeat >= before);
    }
}
