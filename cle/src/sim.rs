//! Software consumer model.
//!
//! There is no RSP to run the test suite against, so this module plays
//! the consumer's role in plain Rust. [`SimBackend`] is a thin,
//! hardware-shaped [`Backend`] impl (it only ever records what was
//! asked of it); [`SimConsumer`] is the thing that actually walks the
//! byte stream, using [`crate::dispatch`] to decode it exactly as a
//! real microcode dispatch loop would. Tests drive both explicitly —
//! `engine.flush()` (or a swap) strikes the doorbell, then the test
//! calls [`SimConsumer::run`] to let the "RSP" catch up — which keeps
//! the cosimulation single-threaded and deterministic.
//!
//! Overlay command *bodies* stay opaque here exactly as they would to
//! the real engine (component D never interprets them) — what this
//! module can observe is which `(overlay, command)` pairs ran, in what
//! order, against which resident state.
//!
//! `run` checks the high-priority ring ahead of the normal one on every
//! iteration, same as real microcode would poll it between commands.
//! On real hardware the two rings fill concurrently, so by the time the
//! consumer reaches a given point in the normal stream, the HP ring
//! either does or doesn't have something queued yet — genuine
//! happens-before, not a race the consumer has to reason about. This
//! cosim has no second thread, so every write made before a `run()`
//! call is already sitting in both rings at once; a test that cares
//! about *when relative to the normal stream* an HP session opened has
//! to draw that line itself — call `run` once with only the commands
//! written before `hp_begin` queued (the consumer parks at the
//! terminator exactly as it would have before the session existed),
//! then queue the HP session and whatever follows it and call `run`
//! again, reusing the same [`SimConsumer`] so its position carries over.
//!
//! Enabled by the `sim` feature, and always available to `#[cfg(test)]`
//! so the engine's own unit tests don't need the feature turned on.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::backend::{Backend, BufferId, RingId};
use crate::block::BlockRecorder;
use crate::command::{self, engine_cmd, BigEndianWord};
use crate::config::WORD_SIZE;
use crate::dispatch::{self, CallStack, Step};
use crate::error::CleError;
use crate::overlay::OverlayRegistry;

/// A minimal [`Backend`] that accepts every call and reports every
/// buffer as immediately released. Used by unit tests that only care
/// about producer-side bookkeeping (cursor math, sentinel placement)
/// and never need a command actually consumed.
#[derive(Default)]
pub struct NullBackend {
    last_syncpoint: AtomicU32,
}

impl Backend for NullBackend {
    fn to_device_addr(&self, addr: *const u8) -> u32 {
        addr as usize as u32
    }

    fn doorbell(&self) {}

    fn buffer_released(&self, _ring: RingId, _which: BufferId) -> bool {
        true
    }

    fn dma(&self, _local_addr: u32, _shared_addr: u32, _len: usize, _to_local: bool, _is_async: bool) {}

    fn idle_until_interrupt(&self) {}

    fn last_reached_syncpoint(&self) -> u32 {
        self.last_syncpoint.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct SharedState {
    buffer_done: [bool; 2],
    hp_buffer_done: [bool; 2],
    last_syncpoint: u32,
}

/// A [`Backend`] that records buffer-release and syncpoint state for
/// [`SimConsumer`] to manipulate, plus a doorbell strike counter so
/// `flush`'s idempotence can be asserted directly.
pub struct SimBackend {
    state: Mutex<SharedState>,
    doorbell_strikes: AtomicU32,
}

impl SimBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(SharedState::default()), doorbell_strikes: AtomicU32::new(0) }
    }

    pub fn doorbell_strikes(&self) -> u32 {
        self.doorbell_strikes.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_buffer_done(&self, ring: RingId, which: BufferId) {
        let mut state = self.state.lock();
        let table = match ring {
            RingId::Normal => &mut state.buffer_done,
            RingId::HighPriority => &mut state.hp_buffer_done,
        };
        table[which.index()] = true;
    }

    pub(crate) fn clear_buffer_done(&self, ring: RingId, which: BufferId) {
        let mut state = self.state.lock();
        let table = match ring {
            RingId::Normal => &mut state.buffer_done,
            RingId::HighPriority => &mut state.hp_buffer_done,
        };
        table[which.index()] = false;
    }

    pub(crate) fn set_last_syncpoint(&self, id: u32) {
        self.state.lock().last_syncpoint = id;
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SimBackend {
    fn to_device_addr(&self, addr: *const u8) -> u32 {
        addr as usize as u32
    }

    fn doorbell(&self) {
        self.doorbell_strikes.fetch_add(1, Ordering::Relaxed);
    }

    fn buffer_released(&self, ring: RingId, which: BufferId) -> bool {
        let state = self.state.lock();
        match ring {
            RingId::Normal => state.buffer_done[which.index()],
            RingId::HighPriority => state.hp_buffer_done[which.index()],
        }
    }

    fn dma(&self, _local_addr: u32, _shared_addr: u32, _len: usize, _to_local: bool, _is_async: bool) {}

    fn idle_until_interrupt(&self) {}

    fn last_reached_syncpoint(&self) -> u32 {
        self.state.lock().last_syncpoint
    }
}

/// One entry in the simulated consumer's execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Overlay { id: u8, command: u8 },
    Syncpoint(u32),
    Signal(u8),
    HpEnter,
    HpLeave,
    Dma { to_local: bool, is_async: bool, local_addr: u32, shared_addr: u32, len: usize },
}

fn read_word(buf: &[u8], at: usize) -> u32 {
    BigEndianWord::read(&buf[at..at + WORD_SIZE]).0
}

/// The software consumer's own state: resident overlay, call stack,
/// ring read positions, and the trace of what it has executed.
/// Separate from [`SimBackend`] since it is touched only by [`run`],
/// never by the producer side.
pub struct SimConsumer {
    resident: Option<u8>,
    calls: CallStack,
    normal_pos: usize,
    hp_pos: usize,
    /// Saved `(normal_pos, resident)` while draining an HP session.
    hp_resume: Option<(usize, Option<u8>)>,
    trace: Vec<Observed>,
    halted: Option<CleError>,
}

impl SimConsumer {
    pub const fn new() -> Self {
        Self {
            resident: None,
            calls: CallStack::new(),
            normal_pos: 0,
            hp_pos: 0,
            hp_resume: None,
            trace: Vec::new(),
            halted: None,
        }
    }

    pub fn trace(&self) -> &[Observed] {
        &self.trace
    }

    pub fn resident(&self) -> Option<u8> {
        self.resident
    }

    pub fn halted(&self) -> Option<CleError> {
        self.halted
    }

    fn fault(&mut self, error: CleError) {
        self.halted = Some(error);
        crate::diag::record(crate::diag::Event::ConsumerHalt { read_pos: self.normal_pos as u32, error });
    }

    /// Decode and execute exactly one step at `pos` in `buf`. Returns
    /// the number of bytes to advance `pos` by, or `None` if the
    /// terminator was hit (caller should stop for this ring). Calls
    /// that jump elsewhere (`call-block`, `return-from-block`) are
    /// applied to `calls`/`pos_override` instead of returning a plain
    /// advance.
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        backend: &SimBackend,
        overlays: &mut OverlayRegistry,
        blocks: &mut BlockRecorder,
        buf: &[u8],
        pos: usize,
    ) -> ExecResult {
        let header = buf[pos];
        let next_word = if pos + WORD_SIZE <= buf.len() { read_word(buf, pos + WORD_SIZE) } else { 0 };
        let step = dispatch::decode(header, next_word, |overlay, cmd| {
            overlays.descriptor(overlay).map(|d| d.command_words[cmd as usize])
        });
        match step {
            Step::Halt => ExecResult::Halt,
            Step::Nop | Step::Interrupt => ExecResult::Advance(WORD_SIZE),
            Step::Overlay { id, command, words } => {
                if self.resident != Some(id) {
                    crate::diag::record(crate::diag::Event::OverlaySwitch { from: self.resident, to: id });
                    self.resident = Some(id);
                    overlays.set_resident(Some(id));
                }
                self.trace.push(Observed::Overlay { id, command });
                ExecResult::Advance(words as usize * WORD_SIZE)
            }
            Step::UnknownOverlay => {
                self.fault(CleError::UnknownOverlay);
                ExecResult::Fault
            }
            Step::CallBlock { address } => match blocks.lookup(address) {
                Some((ptr, len)) => match self.calls.push((pos + 2 * WORD_SIZE) as u32) {
                    Ok(()) => {
                        crate::diag::record(crate::diag::Event::BlockCall { depth: self.calls.depth() as u8 });
                        ExecResult::Jump { ptr, len, pos: 0 }
                    }
                    Err(e) => {
                        self.fault(e);
                        ExecResult::Fault
                    }
                },
                None => {
                    self.fault(CleError::UnknownOverlay);
                    ExecResult::Fault
                }
            },
            Step::ReturnFromBlock => match self.calls.pop() {
                Some(_return_address) => {
                    crate::diag::record(crate::diag::Event::BlockReturn { depth: self.calls.depth() as u8 });
                    ExecResult::Return
                }
                None => ExecResult::Advance(WORD_SIZE),
            },
            Step::Syncpoint { id } => {
                backend.set_last_syncpoint(id);
                crate::diag::record(crate::diag::Event::SyncpointReached(id));
                self.trace.push(Observed::Syncpoint(id));
                ExecResult::Advance(2 * WORD_SIZE)
            }
            Step::Signal { mask } => {
                self.trace.push(Observed::Signal(mask));
                ExecResult::Advance(2 * WORD_SIZE)
            }
            Step::Dma { to_local, is_async } => {
                // `next_word` (decoded above) packs `(len << 1) | is_async`;
                // the address pair follows in the next two words — see
                // the wire layout documented on `crate::engine::Engine::dma`.
                let len = (next_word >> 1) as usize;
                let local_addr = read_word(buf, pos + 2 * WORD_SIZE);
                let shared_addr = read_word(buf, pos + 3 * WORD_SIZE);
                backend.dma(local_addr, shared_addr, len, to_local, is_async);
                self.trace.push(Observed::Dma { to_local, is_async, local_addr, shared_addr, len });
                ExecResult::Advance(4 * WORD_SIZE)
            }
            Step::HpEnter => {
                crate::diag::record(crate::diag::Event::HpEnter);
                self.trace.push(Observed::HpEnter);
                ExecResult::Advance(WORD_SIZE)
            }
            Step::HpLeave => {
                crate::diag::record(crate::diag::Event::HpLeave);
                self.trace.push(Observed::HpLeave);
                ExecResult::Advance(WORD_SIZE)
            }
            Step::Swap => ExecResult::Swap,
        }
    }

    /// Run the normal ring until it parks at the terminator, preempting
    /// into the HP ring whenever one is open — checked between every
    /// command so a pending HP session always wins over continuing
    /// (or swapping) the normal ring.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        backend: &SimBackend,
        overlays: &mut OverlayRegistry,
        blocks: &mut BlockRecorder,
        normal: &[u8],
        normal_active: BufferId,
        hp: &[u8],
        hp_active: BufferId,
    ) {
        if self.halted.is_some() {
            return;
        }
        loop {
            if hp.get(self.hp_pos).copied().map(|b| !command::is_terminator(b)).unwrap_or(false) {
                self.hp_resume = Some((self.normal_pos, self.resident));
                if !self.drain_hp(backend, overlays, blocks, hp, hp_active) {
                    return;
                }
                continue;
            }
            if self.normal_pos >= normal.len() || command::is_terminator(normal[self.normal_pos]) {
                return;
            }
            match self.execute(backend, overlays, blocks, normal, self.normal_pos) {
                ExecResult::Halt => return,
                ExecResult::Fault => return,
                ExecResult::Advance(n) => self.normal_pos += n,
                ExecResult::Swap => {
                    backend.mark_buffer_done(RingId::Normal, normal_active);
                    self.normal_pos = 0;
                }
                // `call-block` written straight to the ring (not nested
                // inside another block): replay the block's storage to
                // completion, then resume the ring just past the command.
                ExecResult::Jump { ptr, len, pos } => {
                    self.run_block(backend, overlays, blocks, ptr, len, pos);
                    if self.halted.is_some() {
                        return;
                    }
                    self.normal_pos += 2 * WORD_SIZE;
                }
                ExecResult::Return => {}
            }
        }
    }

    /// Execute inside a block's storage until `return-from-block` pops
    /// back past the point this call started at, or a nested call
    /// descends further still.
    fn run_block(
        &mut self,
        backend: &SimBackend,
        overlays: &mut OverlayRegistry,
        blocks: &mut BlockRecorder,
        ptr: *const u8,
        len: usize,
        start_pos: usize,
    ) {
        let buf = unsafe { core::slice::from_raw_parts(ptr, len) };
        let mut pos = start_pos;
        loop {
            if self.halted.is_some() {
                return;
            }
            match self.execute(backend, overlays, blocks, buf, pos) {
                ExecResult::Halt | ExecResult::Fault => return,
                ExecResult::Advance(n) => pos += n,
                ExecResult::Return => return,
                ExecResult::Jump { ptr: next_ptr, len: next_len, pos: next_pos } => {
                    self.run_block(backend, overlays, blocks, next_ptr, next_len, next_pos);
                    if self.halted.is_some() {
                        return;
                    }
                    pos += 2 * WORD_SIZE;
                }
                ExecResult::Swap => unreachable!("blocks never contain a swap command"),
            }
        }
    }

    fn drain_hp(
        &mut self,
        backend: &SimBackend,
        overlays: &mut OverlayRegistry,
        blocks: &mut BlockRecorder,
        hp: &[u8],
        hp_active: BufferId,
    ) -> bool {
        loop {
            if self.hp_pos >= hp.len() || command::is_terminator(hp[self.hp_pos]) {
                // Session drained without an explicit `hp-leave`: resume.
                break;
            }
            let (overlay, cmd) = command::decode(hp[self.hp_pos]);
            if overlay == command::ENGINE_OVERLAY && cmd == engine_cmd::HP_LEAVE {
                crate::diag::record(crate::diag::Event::HpLeave);
                self.trace.push(Observed::HpLeave);
                self.hp_pos += WORD_SIZE;
                break;
            }
            match self.execute(backend, overlays, blocks, hp, self.hp_pos) {
                ExecResult::Halt => break,
                ExecResult::Fault => return false,
                ExecResult::Advance(n) => self.hp_pos += n,
                ExecResult::Swap => {
                    backend.mark_buffer_done(RingId::HighPriority, hp_active);
                    self.hp_pos = 0;
                }
                ExecResult::Jump { ptr, len, pos } => {
                    self.run_block(backend, overlays, blocks, ptr, len, pos);
                    if self.halted.is_some() {
                        return false;
                    }
                    self.hp_pos += 2 * WORD_SIZE;
                }
                ExecResult::Return => {}
            }
        }
        if let Some((resume_pos, resume_overlay)) = self.hp_resume.take() {
            self.normal_pos = resume_pos;
            self.resident = resume_overlay;
            overlays.set_resident(resume_overlay);
        }
        true
    }
}

impl Default for SimConsumer {
    fn default() -> Self {
        Self::new()
    }
}

enum ExecResult {
    Halt,
    Fault,
    Advance(usize),
    Swap,
    Jump { ptr: *const u8, len: usize, pos: usize },
    Return,
}
