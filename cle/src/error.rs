//! Error types for the command-list engine.
//!
//! Caller-facing variants are programming bugs: the engine does not try
//! to recover from them. Consumer-side variants describe a halted
//! consumer and are surfaced through [`crate::diag`] rather than panics,
//! since a real consumer halting on hardware is not the same event as
//! a host-process panic.

/// Everything that can go wrong talking to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleError {
    /// `begin(n)` requested more than [`crate::config::MAX_COMMAND_SIZE`] bytes.
    OutOfMemory,
    /// A second `block_begin` was issued while one was already active, or
    /// `hp_begin` was issued while recording.
    RecordingActive,
    /// `block_begin`/`block_run` was issued while the high-priority lane
    /// was active.
    HpActive,
    /// `register_overlay` targeted an id that is currently resident.
    OverlayInUse,
    /// `signal()` tried to touch an engine-reserved status bit.
    SignalReserved,
    /// `syncpoint()` was called while recording a block.
    SyncInBlock,
    /// A DMA address or length violated the 8-byte alignment contract.
    DmaMisaligned,
    /// An overlay id outside `1..=MAX_OVERLAY_ID` was used.
    InvalidOverlay,
    /// The consumer's call stack exceeded [`crate::config::MAX_BLOCK_DEPTH`].
    BlockStackOverflow,
    /// The consumer read a command header naming an unregistered overlay.
    UnknownOverlay,
}

impl CleError {
    /// Whether this is a caller-facing assertion (a programming bug the
    /// engine rejects synchronously) as opposed to a consumer-side halt
    /// reported asynchronously via the diagnostics ring.
    pub fn is_caller_fault(self) -> bool {
        !matches!(self, CleError::BlockStackOverflow | CleError::UnknownOverlay)
    }
}

/// Result alias used throughout the engine.
pub type CleResult<T> = Result<T, CleError>;
