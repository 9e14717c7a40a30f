//! Correlation store for in-flight calls.
//!
//! Every dispatch parks here on a per-call one-shot slot until the matching
//! result frame is routed back, the deadline passes, or the call is
//! cancelled. Exactly one of those happens per call id; late or duplicate
//! deliveries are dropped with a warning.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::Frame;

#[derive(Debug, Error, PartialEq)]
pub enum WaiterError {
    /// Call-id collision at registration. Ids are minted by the dispatcher,
    /// so this is a programmer error, not a runtime condition.
    #[error("duplicate call id '{0}'")]
    DuplicateCallId(String),
}

/// What the parked dispatch observes.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The endpoint's reply frame (normally `tool_result`).
    Delivered(Frame),
    Timeout,
    Cancelled,
}

/// Handle returned by [`WaiterStore::register_call`]; consumed by
/// [`WaiterStore::await_result`].
#[derive(Debug)]
pub struct WaitHandle {
    call_id: String,
    rx: oneshot::Receiver<WaitOutcome>,
    /// Absolute deadline, fixed at registration so time spent queueing the
    /// outbound frame still counts against the call.
    deadline: tokio::time::Instant,
}

struct PendingCall {
    tx: oneshot::Sender<WaitOutcome>,
    device_id: String,
}

#[derive(Default)]
pub struct WaiterStore {
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl WaiterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a slot for `call_id`, bound to `device_id`, with a hard deadline.
    pub fn register_call(
        &self,
        call_id: &str,
        device_id: &str,
        deadline: Duration,
    ) -> Result<WaitHandle, WaiterError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(call_id) {
            return Err(WaiterError::DuplicateCallId(call_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            call_id.to_string(),
            PendingCall {
                tx,
                device_id: device_id.to_string(),
            },
        );
        Ok(WaitHandle {
            call_id: call_id.to_string(),
            rx,
            deadline: tokio::time::Instant::now() + deadline,
        })
    }

    /// Suspend until the slot resolves. Wakes exactly once: the first of
    /// delivery, cancellation, or deadline expiry wins and the slot is gone
    /// afterwards.
    pub async fn await_result(&self, handle: WaitHandle) -> WaitOutcome {
        let WaitHandle {
            call_id,
            rx,
            deadline,
        } = handle;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a send; treat as cancellation.
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => {
                // Deadline first: tear down the slot so a late result is
                // recognizably stale.
                self.remove(&call_id);
                WaitOutcome::Timeout
            }
        }
    }

    /// Route a reply frame to its waiter. Returns `false` (and drops the
    /// frame) when the call is unknown or already completed.
    pub fn deliver(&self, call_id: &str, frame: Frame) -> bool {
        let Some(call) = self.remove(call_id) else {
            log::warn!("dropping result for unknown or completed call '{call_id}'");
            return false;
        };
        if call.tx.send(WaitOutcome::Delivered(frame)).is_err() {
            log::warn!("waiter for call '{call_id}' already gone; result dropped");
            return false;
        }
        true
    }

    /// Cancel one call (caller abandoned or shutdown).
    pub fn cancel(&self, call_id: &str) {
        if let Some(call) = self.remove(call_id) {
            let _ = call.tx.send(WaitOutcome::Cancelled);
        }
    }

    /// Cancel every pending call bound to `device_id`. Used when the device
    /// unregisters so its dispatches fail faster than their deadlines.
    pub fn cancel_device(&self, device_id: &str) -> usize {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, call)| call.device_id == device_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(WaitOutcome::Cancelled);
        }
        count
    }

    /// Cancel everything (shutdown path).
    pub fn cancel_all(&self) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, call)| call).collect()
        };
        for call in drained {
            let _ = call.tx.send(WaitOutcome::Cancelled);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn remove(&self, call_id: &str) -> Option<PendingCall> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    fn result_frame(id: &str) -> Frame {
        Frame::ToolResult {
            id: id.to_string(),
            result: ToolResult::success("ok"),
        }
    }

    #[tokio::test]
    async fn delivery_wakes_the_waiter_once() {
        let store = WaiterStore::new();
        let handle = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap();

        assert!(store.deliver("c1", result_frame("c1")));
        match store.await_result(handle).await {
            WaitOutcome::Delivered(Frame::ToolResult { id, .. }) => assert_eq!(id, "c1"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped() {
        let store = WaiterStore::new();
        let handle = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap();
        assert!(store.deliver("c1", result_frame("c1")));
        assert!(!store.deliver("c1", result_frame("c1")));
        assert!(matches!(
            store.await_result(handle).await,
            WaitOutcome::Delivered(_)
        ));
    }

    #[tokio::test]
    async fn unknown_call_id_is_dropped() {
        let store = WaiterStore::new();
        assert!(!store.deliver("ghost", result_frame("ghost")));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_times_out_and_clears_slot() {
        let store = WaiterStore::new();
        let handle = store
            .register_call("c1", "d1", Duration::from_secs(2))
            .unwrap();
        assert!(matches!(
            store.await_result(handle).await,
            WaitOutcome::Timeout
        ));
        // A result arriving after the timeout is stale.
        assert!(!store.deliver("c1", result_frame("c1")));
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_wakes_with_cancelled() {
        let store = WaiterStore::new();
        let handle = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap();
        store.cancel("c1");
        assert!(matches!(
            store.await_result(handle).await,
            WaitOutcome::Cancelled
        ));
    }

    #[tokio::test]
    async fn duplicate_call_id_is_a_registration_error() {
        let store = WaiterStore::new();
        let _h = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap();
        let err = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err, WaiterError::DuplicateCallId("c1".into()));
    }

    #[tokio::test]
    async fn cancel_device_only_hits_that_device() {
        let store = WaiterStore::new();
        let h1 = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap();
        let h2 = store
            .register_call("c2", "d2", Duration::from_secs(5))
            .unwrap();

        assert_eq!(store.cancel_device("d1"), 1);
        assert!(matches!(store.await_result(h1).await, WaitOutcome::Cancelled));

        assert!(store.deliver("c2", result_frame("c2")));
        assert!(matches!(store.await_result(h2).await, WaitOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn cancel_all_drains_everything() {
        let store = WaiterStore::new();
        let h1 = store
            .register_call("c1", "d1", Duration::from_secs(5))
            .unwrap();
        let h2 = store
            .register_call("c2", "d2", Duration::from_secs(5))
            .unwrap();
        store.cancel_all();
        assert!(matches!(store.await_result(h1).await, WaitOutcome::Cancelled));
        assert!(matches!(store.await_result(h2).await, WaitOutcome::Cancelled));
        assert_eq!(store.pending_count(), 0);
    }
}
