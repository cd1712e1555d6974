//! HTTP/2 flow control (RFC 7540 §6.9): one window per stream plus one for
//! the whole connection, each starting at 65,535 octets.

use std::sync::atomic::{AtomicI64, Ordering};

pub(crate) const DEFAULT_WINDOW: i64 = 65_535;

/// A flow-control window. Signed so it can legally go negative (a SETTINGS
/// change to `initial_window_size` can shrink an already-negative-capable
/// window per §6.9.2).
pub(crate) struct Window {
    available: AtomicI64,
}

impl Window {
    pub(crate) fn new(initial: i64) -> Self {
        Window { available: AtomicI64::new(initial) }
    }

    pub(crate) fn available(&self) -> i64 {
        self.available.load(Ordering::SeqCst)
    }

    pub(crate) fn consume(&self, n: u32) {
        self.available.fetch_sub(n as i64, Ordering::SeqCst);
    }

    pub(crate) fn increment(&self, n: u32) {
        self.available.fetch_add(n as i64, Ordering::SeqCst);
    }

    /// Applied when a SETTINGS change shifts the expected initial window:
    /// every open stream's window shifts by the same delta (§6.9.2).
    pub(crate) fn adjust(&self, delta: i64) {
        self.available.fetch_add(delta, Ordering::SeqCst);
    }
}

/// Decides whether a received window has shrunk enough below its initial
/// budget to justify a WINDOW_UPDATE, per the common "replenish once half
/// consumed" heuristic.
pub(crate) fn should_replenish(consumed_since_update: u32, initial: u32) -> bool {
    consumed_since_update * 2 >= initial
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_and_increment_round_trip() {
        let window = Window::new(DEFAULT_WINDOW);
        window.consume(1000);
        assert_eq!(window.available(), DEFAULT_WINDOW - 1000);
        window.increment(1000);
        assert_eq!(window.available(), DEFAULT_WINDOW);
    }

    #[test]
    fn window_can_go_negative_after_settings_shrink() {
        let window = Window::new(100);
        window.consume(150);
        assert_eq!(window.available(), -50);
    }

    #[test]
    fn replenish_heuristic_triggers_at_half() {
        assert!(!should_replenish(100, 1000));
        assert!(should_replenish(500, 1000));
    }
}
