use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Point-in-time view of a session's key bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub key_outdated: bool,
    pub key_rollover_count: i64,
    pub key_invalid_count: u64,
}

/// Key freshness flag and counters, shared by all callers of a session.
#[derive(Debug)]
pub struct SessionState {
    key_outdated: AtomicBool,
    rollover_count: AtomicI64,
    invalid_count: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// No key yet: outdated, no handshake, no invalidations.
    pub fn new() -> Self {
        Self {
            key_outdated: AtomicBool::new(true),
            rollover_count: AtomicI64::new(-1),
            invalid_count: AtomicU64::new(0),
        }
    }

    pub fn key_outdated(&self) -> bool {
        self.key_outdated.load(Ordering::SeqCst)
    }

    pub fn rollover_count(&self) -> i64 {
        self.rollover_count.load(Ordering::SeqCst)
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid_count.load(Ordering::SeqCst)
    }

    /// A handshake completed. Returns the new rollover count.
    ///
    /// The count is bumped before the flag clears, so a caller that sees the
    /// flag cleared also sees the new count.
    pub fn record_handshake(&self) -> i64 {
        let count = self.rollover_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.key_outdated.store(false, Ordering::SeqCst);
        count
    }

    /// Raise the outdated flag unless a handshake completed after
    /// `observed_rollover` was read. Returns whether the flag was raised.
    ///
    /// A handshake racing with this call can leave the flag raised over a
    /// fresh key; that costs one extra handshake, never a stale request.
    pub fn mark_outdated_since(&self, observed_rollover: i64) -> bool {
        if self.rollover_count() != observed_rollover {
            return false;
        }
        self.key_outdated.store(true, Ordering::SeqCst);
        true
    }

    /// The server rejected the current key. Stays raised until a handshake
    /// completes.
    pub fn mark_outdated(&self) {
        self.key_outdated.store(true, Ordering::SeqCst);
    }

    /// A retry after a cryptographic rejection went through. Returns the
    /// new count.
    pub fn record_key_invalid(&self) -> u64 {
        self.invalid_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            key_outdated: self.key_outdated(),
            key_rollover_count: self.rollover_count(),
            key_invalid_count: self.invalid_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state() {
        let state = SessionState::new();
        assert_eq!(
            state.snapshot(),
            SessionStats {
                key_outdated: true,
                key_rollover_count: -1,
                key_invalid_count: 0,
            }
        );
    }

    #[test]
    fn first_handshake_counts_zero() {
        let state = SessionState::new();
        assert_eq!(state.record_handshake(), 0);
        assert!(!state.key_outdated());
        assert_eq!(state.record_handshake(), 1);
    }

    #[test]
    fn stale_signal_ignored_after_newer_handshake() {
        let state = SessionState::new();
        state.record_handshake();
        let observed = state.rollover_count();
        state.record_handshake();
        assert!(!state.mark_outdated_since(observed));
        assert!(!state.key_outdated());

        assert!(state.mark_outdated_since(state.rollover_count()));
        assert!(state.key_outdated());
    }

    #[test]
    fn rejection_raises_flag_until_handshake() {
        let state = SessionState::new();
        state.record_handshake();
        state.mark_outdated();
        assert!(state.key_outdated());
        assert_eq!(state.rollover_count(), 0);
        state.record_handshake();
        assert!(!state.key_outdated());
    }

    #[test]
    fn invalid_count_increments() {
        let state = SessionState::new();
        assert_eq!(state.record_key_invalid(), 1);
        assert_eq!(state.record_key_invalid(), 2);
        assert_eq!(state.invalid_count(), 2);
    }
}
