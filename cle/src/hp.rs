//! High-priority lane (component F): bookkeeping for the second ring
//! that preempts the normal one between command boundaries.
//!
//! This module only tracks whether a session is currently open for
//! writes — it does not own a ring (that is `Engine`'s HP `Ring`
//! instance) and does not implement preemption itself (that is the
//! consumer's job, modelled in `sim` for host-side tests).

use crate::error::{CleError, CleResult};

/// Tracks whether the writer is currently inside an `hp_begin`/`hp_end`
/// bracket. Sessions do not nest: `Multiple HP sessions are served in
/// order`, never concurrently.
pub struct HpLane {
    active: bool,
}

impl HpLane {
    pub const fn new() -> Self {
        Self { active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Open a session. Rejects a second `hp_begin` before the matching
    /// `hp_end` — the same "a write-redirection session is already
    /// open" condition as a nested `block_begin`.
    pub fn begin(&mut self) -> CleResult<()> {
        if self.active {
            return Err(CleError::RecordingActive);
        }
        self.active = true;
        Ok(())
    }

    /// Close the session. Calling `hp_end` without a matching
    /// `hp_begin` is a caller bug, reported the same way.
    pub fn end(&mut self) -> CleResult<()> {
        if !self.active {
            return Err(CleError::RecordingActive);
        }
        self.active = false;
        Ok(())
    }
}

impl Default for HpLane {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_do_not_nest() {
        let mut hp = HpLane::new();
        hp.begin().unwrap();
        assert_eq!(hp.begin(), Err(CleError::RecordingActive));
        hp.end().unwrap();
        assert!(hp.begin().is_ok());
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut hp = HpLane::new();
        assert_eq!(hp.end(), Err(CleError::RecordingActive));
    }
}
