use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Sliding-window rate limiter: at most `max_requests` recorded within any
/// trailing `window`. State is interior-mutex so the limiter can be shared
/// behind an `Arc`.
pub struct SlidingWindow {
    window: Duration,
    max_requests: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(window_secs: u64, max_requests: usize) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_requests,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one request if the window has room. Returns `false` without
    /// recording when the limit is exhausted.
    pub fn try_record(&self) -> bool {
        let mut ts = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        ts.retain(|&t| now.duration_since(t) < self.window);
        if ts.len() >= self.max_requests {
            return false;
        }
        ts.push_back(now);
        true
    }

    /// Requests still available in the current window.
    pub fn remaining(&self) -> usize {
        let mut ts = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        ts.retain(|&t| now.duration_since(t) < self.window);
        self.max_requests.saturating_sub(ts.len())
    }

    pub fn describe(&self) -> String {
        format!(
            "{} requests per {}s",
            self.max_requests,
            self.window.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_up_to_the_limit() {
        let w = SlidingWindow::new(60, 3);
        assert!(w.try_record());
        assert!(w.try_record());
        assert!(w.try_record());
        assert!(!w.try_record());
    }

    #[test]
    fn denied_attempts_do_not_consume_budget() {
        let w = SlidingWindow::new(60, 1);
        assert!(w.try_record());
        assert!(!w.try_record());
        assert!(!w.try_record());
        assert_eq!(w.remaining(), 0);
    }

    #[test]
    fn window_expiry_frees_budget() {
        let w = SlidingWindow::new(0, 1);
        assert!(w.try_record());
        // A zero-length window expires entries immediately.
        std::thread::sleep(Duration::from_millis(5));
        assert!(w.try_record());
    }

    #[test]
    fn remaining_counts_down() {
        let w = SlidingWindow::new(60, 5);
        assert_eq!(w.remaining(), 5);
        w.try_record();
        w.try_record();
        assert_eq!(w.remaining(), 3);
    }
}
