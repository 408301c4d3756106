//! Diagnostics ring.
//!
//! A small lock-free event ring, separate from the command rings,
//! recording engine-internal events (overlay switches, buffer swaps,
//! HP enter/leave, syncpoints reached, consumer halts) for offline
//! debugging. Consumer-side errors in particular are reported here
//! rather than as a Rust panic — a halted RSP is a runtime condition
//! the caller polls for, not a host-process fault.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::error::CleError;

const DIAG_RING_SIZE: usize = 256;

/// One recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    None,
    BufferSwap { from: u8 },
    OverlaySwitch { from: Option<u8>, to: u8 },
    BlockCall { depth: u8 },
    BlockReturn { depth: u8 },
    HpEnter,
    HpLeave,
    SyncpointReached(u32),
    /// The consumer halted at `read_pos` with the given error; the
    /// engine must be reset (close + init) to recover.
    ConsumerHalt { read_pos: u32, error: CleError },
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    seq: u64,
    event: Event,
}

const EMPTY_SLOT: Slot = Slot { seq: 0, event: Event::None };

struct Ring {
    slots: [Slot; DIAG_RING_SIZE],
}

static DIAG: Mutex<Ring> = Mutex::new(Ring { slots: [EMPTY_SLOT; DIAG_RING_SIZE] });
static WRITE_INDEX: AtomicU64 = AtomicU64::new(0);
static TRACING_ENABLED: AtomicBool = AtomicBool::new(true);
static LAST_HALT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Record an event. Cheap enough to call from hot paths (`begin`/`end`)
/// when `trace-verbose` is enabled; always called for the rarer
/// structural events (swaps, switches, halts) regardless of feature.
pub fn record(event: Event) {
    if !TRACING_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let seq = WRITE_INDEX.fetch_add(1, Ordering::Relaxed) + 1;
    let slot_idx = (seq as usize - 1) % DIAG_RING_SIZE;
    let mut ring = DIAG.lock();
    ring.slots[slot_idx] = Slot { seq, event };
    if matches!(event, Event::ConsumerHalt { .. }) {
        LAST_HALT_SEQ.store(seq, Ordering::Release);
    }
}

pub fn set_enabled(enabled: bool) {
    TRACING_ENABLED.store(enabled, Ordering::SeqCst);
}

/// The most recently recorded consumer halt, if any event has been
/// recorded since the ring was created or last drained past it.
pub fn last_halt() -> Option<(u32, CleError)> {
    let seq = LAST_HALT_SEQ.load(Ordering::Acquire);
    if seq == 0 {
        return None;
    }
    let ring = DIAG.lock();
    let slot = ring.slots[(seq as usize - 1) % DIAG_RING_SIZE];
    if slot.seq != seq {
        return None; // overwritten since
    }
    match slot.event {
        Event::ConsumerHalt { read_pos, error } => Some((read_pos, error)),
        _ => None,
    }
}

/// Copy out the most recent `limit` events, oldest first.
#[cfg(any(test, feature = "sim"))]
pub fn recent(limit: usize) -> alloc::vec::Vec<Event> {
    let current = WRITE_INDEX.load(Ordering::Relaxed);
    let count = (current as usize).min(DIAG_RING_SIZE).min(limit);
    let ring = DIAG.lock();
    let mut out = alloc::vec::Vec::with_capacity(count);
    let start = current.saturating_sub(count as u64);
    for seq in (start + 1)..=current {
        let slot = ring.slots[(seq as usize - 1) % DIAG_RING_SIZE];
        if slot.seq == seq {
            out.push(slot.event);
        }
    }
    out
}
