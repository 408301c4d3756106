//! Compile-time layout constants.
//!
//! Every constant here backs a specific invariant from the ring/overlay/
//! block design; changing one changes the guarantee, not just a number.

/// Size in bytes of each half of the normal-priority ring. Must be a
/// power of two and 8-byte aligned, per the shared-memory layout contract.
pub const RING_BUFFER_SIZE: usize = 8 * 1024;

/// Size in bytes of the high-priority ring. Smaller than the normal ring —
/// HP sessions are expected to be short (overlay uploads, small state
/// patches), not full frame command lists.
pub const HP_RING_BUFFER_SIZE: usize = 4 * 1024;

/// Machine word size in bytes (RSP data-memory word).
pub const WORD_SIZE: usize = 4;

/// Largest command a single `begin`/`end` pair may write, in words.
pub const MAX_COMMAND_WORDS: usize = 16;

/// Largest command a single `begin`/`end` pair may write, in bytes.
pub const MAX_COMMAND_SIZE: usize = MAX_COMMAND_WORDS * WORD_SIZE;

/// The sentinel is placed so at least this many bytes remain between it
/// and the end of the active buffer — guarantees a command written
/// exactly at the sentinel still fits without straddling the boundary.
pub const SENTINEL_MARGIN: usize = MAX_COMMAND_SIZE;

/// Overlay id 0 is engine-reserved; ids 1..=15 are registrable.
pub const MAX_OVERLAYS: usize = 16;

/// Highest registrable overlay id (inclusive). Overlay 0 is reserved.
pub const MAX_OVERLAY_ID: u8 = 15;

/// Hard limit on nested `call-block` depth, enforced by the consumer's
/// internal return-address stack.
pub const MAX_BLOCK_DEPTH: usize = 8;

/// Reserved byte value that halts the consumer when written at the
/// write cursor. Never a valid command header.
pub const TERMINATOR: u8 = 0x01;

/// Status-register bit assignments. Bits 0-2 are user-programmable via
/// `signal()`; bits 3-7 are engine-owned.
pub mod signal_bits {
    /// Mask of bits a caller may set/clear via `signal()`.
    pub const USER_MASK: u8 = 0b0000_0111;
    /// Mask of bits reserved for engine bookkeeping.
    pub const ENGINE_MASK: u8 = 0b1111_1000;
    /// Consumer sets this when it has finished with the buffer that was
    /// active before the most recent swap, and it is safe to reuse.
    pub const BUFFER_DONE: u8 = 1 << 3;
    /// Consumer sets this while executing inside the high-priority lane.
    pub const HP_ACTIVE: u8 = 1 << 4;
}

/// DMA alignment contract: both addresses and the transfer length must
/// be multiples of this many bytes.
pub const DMA_ALIGNMENT: usize = 8;
