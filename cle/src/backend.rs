//! Hardware hand-off surface.
//!
//! Everything the engine needs from the outside world — address
//! translation, the doorbell, DMA kickoff, idling — is expressed as a
//! trait so the exact same ring/overlay/block/syncpoint logic runs
//! against real SP registers on target and against [`crate::sim`] on
//! the host. Production drivers implement this once over the real
//! MMIO; tests implement it (or use the built-in `sim` one) in a few
//! lines.

/// Identifies one half of the normal-priority ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
    A,
    B,
}

impl BufferId {
    pub fn other(self) -> Self {
        match self {
            BufferId::A => BufferId::B,
            BufferId::B => BufferId::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            BufferId::A => 0,
            BufferId::B => 1,
        }
    }
}

/// Identifies which physical ring a buffer-lifecycle callback concerns.
/// The normal ring and the high-priority ring share `BufferId` (A/B)
/// values but are tracked independently by the consumer, so callbacks
/// that touch per-ring state need both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingId {
    Normal,
    HighPriority,
}

/// The engine's view of the consumer side of the protocol.
///
/// All methods are called from the single producer context; the trait
/// itself carries no thread-safety requirement beyond what an
/// implementation chooses to provide (the engine's own contract is
/// that it is not re-entrant — see [`crate::engine::Engine`]).
pub trait Backend {
    /// Translate a buffer's address into whatever 32-bit address the
    /// consumer's DMA engine understands (physical RAM address on real
    /// hardware, an opaque token in software models).
    fn to_device_addr(&self, addr: *const u8) -> u32;

    /// Strike the doorbell: starts the consumer if halted at the
    /// terminator, has no effect if it is already running. Must be
    /// cheap — the protocol relies on `flush` being near-free.
    fn doorbell(&self);

    /// True once the consumer has signalled (via the buffer-done status
    /// bit) that `which` half of `ring` is no longer being read and may
    /// be reused by the producer.
    fn buffer_released(&self, ring: RingId, which: BufferId) -> bool;

    /// Kick a transfer between shared RAM and the consumer's local
    /// memory. `to_local == true` means shared -> local. When
    /// `is_async` is false the call does not return until the consumer
    /// has completed the transfer.
    fn dma(&self, local_addr: u32, shared_addr: u32, len: usize, to_local: bool, is_async: bool);

    /// Block the calling CPU context until the next consumer interrupt.
    /// A correct implementation may simply spin; a good one parks the
    /// caller and wakes on interrupt, per the "scheduling-friendly wait"
    /// requirement on `wait_syncpoint`.
    fn idle_until_interrupt(&self);

    /// Read the shared "last reached syncpoint" cell.
    fn last_reached_syncpoint(&self) -> u32;
}
