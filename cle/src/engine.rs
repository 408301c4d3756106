//! Public front end (component I): the single type every producer
//! talks to. `Engine` owns the normal ring, the high-priority ring,
//! the overlay registry, the block recorder and the syncpoint tracker,
//! and routes every `begin`/`end` pair to whichever of those three is
//! the current write target.
//!
//! Per §5 of the design, the API is **not** re-entrant: `Engine` is
//! `Send` (a driver may hand it to a different thread at init time)
//! but is never wrapped in an internal lock here. Serializing calls
//! across producer threads is the embedding application's job — a
//! silent internal mutex would hide a re-entrancy bug instead of
//! surfacing it.

use alloc::vec::Vec;

use crate::backend::{Backend, BufferId, RingId};
use crate::block::{BlockHandle, BlockRecorder};
use crate::command::{self, engine_cmd, BigEndianWord};
use crate::config::{self, signal_bits, WORD_SIZE};
use crate::diag;
use crate::dma;
use crate::error::{CleError, CleResult};
use crate::hp::HpLane;
use crate::overlay::{OverlayDescriptor, OverlayRegistry};
use crate::ring::{CommandSpan, Ring};
use crate::syncpoint::SyncpointTracker;

/// A writable span for one command, acquired by [`Engine::begin`] and
/// closed by [`CommandWriter::commit`]. Never implicitly published by
/// `Drop` — per the design notes, forgetting to close a span on any
/// exit path is a caller bug, caught in debug builds by the underlying
/// span types' own tripwire rather than silently patched over.
pub enum CommandWriter<'e, B: Backend> {
    Normal(CommandSpan<'e, { config::RING_BUFFER_SIZE }>, &'e B),
    Hp(CommandSpan<'e, { config::HP_RING_BUFFER_SIZE }>, &'e B),
    Block(BlockSpan<'e>),
}

impl<'e, B: Backend> CommandWriter<'e, B> {
    /// The writable bytes for this command.
    pub fn bytes(&mut self) -> &mut [u8] {
        match self {
            CommandWriter::Normal(span, _) => span.bytes(),
            CommandWriter::Hp(span, _) => span.bytes(),
            CommandWriter::Block(span) => span.bytes(),
        }
    }

    /// Close the write. For a ring target this stamps the terminator
    /// and may trigger a buffer swap; for a block target it simply
    /// leaves the bytes in the scratch region (there is no terminator
    /// or swap inside block storage).
    pub fn commit(self) {
        match self {
            CommandWriter::Normal(span, backend) => span.commit(backend),
            CommandWriter::Hp(span, backend) => span.commit(backend),
            CommandWriter::Block(span) => span.commit(),
        }
    }
}

/// The block-recording counterpart of [`CommandSpan`]: a reserved
/// range inside the block builder's scratch `Vec`, committed with no
/// barrier or terminator since the bytes are only replayed later, via
/// `call-block`, never read directly by the consumer off this region.
#[must_use = "a BlockSpan must be committed with `.commit()`"]
pub struct BlockSpan<'e> {
    bytes: &'e mut Vec<u8>,
    start: usize,
    len: usize,
    committed: bool,
}

impl<'e> BlockSpan<'e> {
    fn bytes(&mut self) -> &mut [u8] {
        &mut self.bytes[self.start..self.start + self.len]
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<'e> Drop for BlockSpan<'e> {
    fn drop(&mut self) {
        debug_assert!(self.committed, "BlockSpan dropped without commit() — command never recorded");
    }
}

/// The command-list engine. Generic over the [`Backend`] so the exact
/// same ring/overlay/block/syncpoint logic runs against real SP MMIO
/// on target and against [`crate::sim`] on the host.
pub struct Engine<B: Backend> {
    backend: B,
    normal: Ring<{ config::RING_BUFFER_SIZE }>,
    hp_ring: Ring<{ config::HP_RING_BUFFER_SIZE }>,
    overlays: OverlayRegistry,
    blocks: BlockRecorder,
    hp: HpLane,
    syncpoints: SyncpointTracker,
}

impl<B: Backend> Engine<B> {
    /// Allocate the rings and bring up the engine's bookkeeping.
    /// Corresponds to §4.I's `init()` — the ring buffers live inline
    /// in `Engine` rather than being separately heap-allocated, and
    /// installing interrupt handlers is the concrete `Backend`'s job
    /// (the engine has no opinion on how interrupts are wired).
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            normal: Ring::new(RingId::Normal),
            hp_ring: Ring::new(RingId::HighPriority),
            overlays: OverlayRegistry::new(),
            blocks: BlockRecorder::new(),
            hp: HpLane::new(),
            syncpoints: SyncpointTracker::new(),
        }
    }

    /// Tear the engine down and hand the backend back to the caller.
    /// Corresponds to §4.I's `close()`. There is no per-command
    /// cancellation in this protocol (§5) — the only way to abandon
    /// pending work is exactly this: drop the engine and its rings.
    pub fn close(self) -> B {
        self.backend
    }

    /// Address of one half of the normal ring, for a driver that needs
    /// to hand the shared-memory layout to real hardware at init time.
    pub fn normal_buffer_addr(&self, which: BufferId) -> u32 {
        self.backend.to_device_addr(self.normal.buffer_ptr(which))
    }

    /// Address of one half of the high-priority ring.
    pub fn hp_buffer_addr(&self, which: BufferId) -> u32 {
        self.backend.to_device_addr(self.hp_ring.buffer_ptr(which))
    }

    /// The most recent consumer-side halt recorded in the diagnostics
    /// ring, if any — the CPU-facing half of the diagnostic interrupt
    /// described in §7.
    pub fn last_halt(&self) -> Option<(u32, CleError)> {
        diag::last_halt()
    }

    // ---- Overlay Registry (4.C) ----------------------------------

    /// Bind `descriptor` to `id` (1..=15). Fails with
    /// [`CleError::OverlayInUse`] if `id` is currently resident.
    pub fn register_overlay(&mut self, id: u8, descriptor: OverlayDescriptor) -> CleResult<()> {
        self.overlays.register(id, descriptor)
    }

    /// The saved-state region address for a registered overlay, for
    /// hosts preparing state while the overlay is known non-resident.
    pub fn overlay_state_addr(&self, id: u8) -> CleResult<u32> {
        self.overlays.state_addr(id)
    }

    // ---- Public Front End: begin/end/flush/sync/signal (4.I) ------

    /// Acquire a writable span for the next command, routed to
    /// whichever of the block builder, the HP ring, or the normal ring
    /// is the current write target. Block recording takes priority
    /// over HP (the two are mutually exclusive by construction: entering
    /// one while the other is active is rejected elsewhere), so the
    /// order checked here doesn't matter in practice but mirrors how a
    /// caller would reason about it: "are we recording? else are we in
    /// HP? else the normal ring."
    pub fn begin(&mut self, n: usize) -> CleResult<CommandWriter<'_, B>> {
        if n == 0 || n > config::MAX_COMMAND_SIZE {
            return Err(CleError::OutOfMemory);
        }
        if let Some(bytes) = self.blocks.recording_bytes() {
            let start = bytes.len();
            bytes.resize(start + n, 0);
            return Ok(CommandWriter::Block(BlockSpan { bytes, start, len: n, committed: false }));
        }
        if self.hp.is_active() {
            let span = self.hp_ring.begin(n, &self.backend)?;
            return Ok(CommandWriter::Hp(span, &self.backend));
        }
        let span = self.normal.begin(n, &self.backend)?;
        Ok(CommandWriter::Normal(span, &self.backend))
    }

    fn write_engine_command(&mut self, opcode: u8, arg: Option<u32>) -> CleResult<()> {
        let n = if arg.is_some() { 2 * WORD_SIZE } else { WORD_SIZE };
        let mut writer = self.begin(n)?;
        let bytes = writer.bytes();
        bytes[0] = command::header(command::ENGINE_OVERLAY, opcode);
        for b in &mut bytes[1..WORD_SIZE] {
            *b = 0;
        }
        if let Some(word) = arg {
            BigEndianWord(word).write(&mut bytes[WORD_SIZE..2 * WORD_SIZE]);
        }
        writer.commit();
        Ok(())
    }

    /// Strike the doorbell. Idempotent and cheap; a no-op while
    /// recording a block, since the commands being recorded were never
    /// written to a ring the consumer could be woken up to read.
    pub fn flush(&self) {
        if self.blocks.is_recording() {
            return;
        }
        self.backend.doorbell();
    }

    /// Append a `signal` command carrying `mask`. Rejects any attempt
    /// to touch an engine-reserved bit ([`signal_bits::ENGINE_MASK`]).
    pub fn signal(&mut self, mask: u8) -> CleResult<()> {
        if mask & signal_bits::ENGINE_MASK != 0 {
            return Err(CleError::SignalReserved);
        }
        self.write_engine_command(engine_cmd::SIGNAL, Some(mask as u32))
    }

    /// `wait_syncpoint(syncpoint())`. Disallowed while the high-priority
    /// lane is open — the source leaves this undocumented, so the
    /// stricter reading (disallow) is the one this engine takes.
    pub fn sync(&mut self) -> CleResult<()> {
        if self.hp.is_active() {
            return Err(CleError::HpActive);
        }
        let id = self.syncpoint()?;
        self.wait_syncpoint(id);
        Ok(())
    }

    // ---- Syncpoint Tracker (4.G) -----------------------------------

    /// Allocate the next syncpoint id and append the command carrying
    /// it to the current write target. Rejected while recording a
    /// block — syncpoint ids must be monotonic and a block may be
    /// replayed any number of times, so a syncpoint inside one would
    /// violate that. The id is allocated only after this check passes,
    /// so a rejected call never burns one.
    pub fn syncpoint(&mut self) -> CleResult<u32> {
        if self.blocks.is_recording() {
            return Err(CleError::SyncInBlock);
        }
        let id = self.syncpoints.allocate();
        self.write_engine_command(engine_cmd::SYNCPOINT, Some(id))?;
        Ok(id)
    }

    /// `true` iff the consumer has reported progress past `id`.
    pub fn check_syncpoint(&self, id: u32) -> bool {
        self.syncpoints.check(id, &self.backend)
    }

    /// Block the calling CPU context until `check_syncpoint(id)` holds.
    /// Idles via [`Backend::idle_until_interrupt`] between polls.
    pub fn wait_syncpoint(&self, id: u32) {
        self.syncpoints.wait(id, &self.backend);
    }

    // ---- Block Recorder (4.E) ---------------------------------------

    /// Start redirecting `begin`/`end` into a scratch region instead of
    /// a ring. Rejected while the high-priority lane is open (the
    /// stricter of the two documented variants — recording mode and HP
    /// mode are mutually exclusive) and while a recording is already
    /// active (no nested `block_begin`).
    pub fn block_begin(&mut self) -> CleResult<()> {
        if self.hp.is_active() {
            return Err(CleError::HpActive);
        }
        self.blocks.block_begin()
    }

    /// Seal the region being recorded and return a replayable handle.
    pub fn block_end(&mut self) -> CleResult<BlockHandle> {
        self.blocks.block_end()
    }

    /// Append a `call-block` command naming `handle`'s storage to the
    /// current write target (the ring, the HP ring, or an outer block
    /// being recorded — blocks may call blocks). Disallowed while the
    /// high-priority lane is open, per the documented limitation that
    /// block calls cannot appear inside HP.
    pub fn block_run(&mut self, handle: BlockHandle) -> CleResult<()> {
        if self.hp.is_active() {
            return Err(CleError::HpActive);
        }
        let nested = self.blocks.is_recording();
        let (ptr, _len) = self.blocks.resolve_for_call(handle, nested)?;
        let addr = self.backend.to_device_addr(ptr);
        self.write_engine_command(engine_cmd::CALL_BLOCK, Some(addr))
    }

    /// Release one reference to `handle`. The caller must not free a
    /// block whose calls are still embedded in another live block.
    pub fn block_free(&mut self, handle: BlockHandle) -> CleResult<()> {
        self.blocks.block_free(handle)
    }

    // ---- High-Priority Lane (4.F) -------------------------------------

    /// Open a high-priority session: subsequent writes target the HP
    /// ring until [`Engine::hp_end`]. Rejected while recording a block.
    pub fn hp_begin(&mut self) -> CleResult<()> {
        if self.blocks.is_recording() {
            return Err(CleError::RecordingActive);
        }
        self.hp.begin()?;
        self.write_engine_command(engine_cmd::HP_ENTER, None)
    }

    /// Close the current high-priority session.
    pub fn hp_end(&mut self) -> CleResult<()> {
        self.write_engine_command(engine_cmd::HP_LEAVE, None)?;
        self.hp.end()
    }

    // ---- DMA Bridge (4.H) ---------------------------------------------

    /// Enqueue a shared-RAM → local-memory transfer. Wire layout: header
    /// word, then `(len << 1) | is_async` (the word [`crate::dispatch::decode`]
    /// reads to classify the command), then `local_addr`, then
    /// `shared_addr` — four words total.
    pub fn dma_to_local(&mut self, local_addr: u32, shared_addr: u32, len: usize, is_async: bool) -> CleResult<()> {
        self.dma(local_addr, shared_addr, len, true, is_async)
    }

    /// Enqueue a local-memory → shared-RAM transfer. Same wire layout
    /// as [`Engine::dma_to_local`].
    pub fn dma_to_shared(&mut self, local_addr: u32, shared_addr: u32, len: usize, is_async: bool) -> CleResult<()> {
        self.dma(local_addr, shared_addr, len, false, is_async)
    }

    fn dma(&mut self, local_addr: u32, shared_addr: u32, len: usize, to_local: bool, is_async: bool) -> CleResult<()> {
        let transfer = dma::Transfer::new(local_addr, shared_addr, len, to_local, is_async)?;
        let opcode = if to_local { engine_cmd::DMA_TO_LOCAL } else { engine_cmd::DMA_TO_SHARED };
        let mut writer = self.begin(4 * WORD_SIZE)?;
        let bytes = writer.bytes();
        bytes[0] = command::header(command::ENGINE_OVERLAY, opcode);
        for b in &mut bytes[1..WORD_SIZE] {
            *b = 0;
        }
        let flags = ((transfer.len as u32) << 1) | transfer.is_async as u32;
        BigEndianWord(flags).write(&mut bytes[WORD_SIZE..2 * WORD_SIZE]);
        BigEndianWord(transfer.local_addr).write(&mut bytes[2 * WORD_SIZE..3 * WORD_SIZE]);
        BigEndianWord(transfer.shared_addr).write(&mut bytes[3 * WORD_SIZE..4 * WORD_SIZE]);
        writer.commit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayDescriptor;
    use crate::sim::{Observed, SimBackend, SimConsumer};

    fn overlay(command_words: [u8; 16]) -> OverlayDescriptor {
        OverlayDescriptor {
            code_addr: 0x1000,
            code_size: 256,
            data_addr: 0x2000,
            data_size: 64,
            saved_state_addr: 0x3000,
            saved_state_size: 64,
            command_words,
        }
    }

    fn write_overlay_cmd(engine: &mut Engine<SimBackend>, overlay_id: u8, cmd_id: u8) {
        let mut w = engine.begin(WORD_SIZE).unwrap();
        w.bytes()[0] = command::header(overlay_id, cmd_id);
        w.commit();
    }

    /// Drive the software consumer across whichever ring halves are
    /// currently active, mirroring how a real RSP would read straight
    /// out of shared memory.
    fn drive(engine: &mut Engine<SimBackend>, consumer: &mut SimConsumer) {
        let normal = unsafe {
            core::slice::from_raw_parts(engine.normal.buffer_ptr(engine.normal.active_id()), config::RING_BUFFER_SIZE)
        };
        let hp = unsafe {
            core::slice::from_raw_parts(engine.hp_ring.buffer_ptr(engine.hp_ring.active_id()), config::HP_RING_BUFFER_SIZE)
        };
        consumer.run(
            &engine.backend,
            &mut engine.overlays,
            &mut engine.blocks,
            normal,
            engine.normal.active_id(),
            hp,
            engine.hp_ring.active_id(),
        );
    }

    #[test]
    fn basic_ordering_then_syncpoint() {
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();
        write_overlay_cmd(&mut engine, 2, 0x0);
        write_overlay_cmd(&mut engine, 2, 0x1);
        write_overlay_cmd(&mut engine, 2, 0x2);
        let sp = engine.syncpoint().unwrap();
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert_eq!(
            consumer.trace(),
            &[
                Observed::Overlay { id: 2, command: 0x0 },
                Observed::Overlay { id: 2, command: 0x1 },
                Observed::Overlay { id: 2, command: 0x2 },
                Observed::Syncpoint(sp),
            ]
        );
        engine.backend.set_last_syncpoint(sp);
        assert!(engine.check_syncpoint(sp));
    }

    #[test]
    fn overlay_switching_round_trips_between_two_ids() {
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();
        engine.register_overlay(3, overlay([1; 16])).unwrap();
        write_overlay_cmd(&mut engine, 2, 0x0);
        write_overlay_cmd(&mut engine, 3, 0x0);
        write_overlay_cmd(&mut engine, 2, 0x1);
        write_overlay_cmd(&mut engine, 3, 0x1);
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert_eq!(
            consumer.trace(),
            &[
                Observed::Overlay { id: 2, command: 0x0 },
                Observed::Overlay { id: 3, command: 0x0 },
                Observed::Overlay { id: 2, command: 0x1 },
                Observed::Overlay { id: 3, command: 0x1 },
            ]
        );
    }

    #[test]
    fn block_replay_runs_the_recorded_sequence_twice() {
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();
        engine.register_overlay(3, overlay([1; 16])).unwrap();

        engine.block_begin().unwrap();
        write_overlay_cmd(&mut engine, 2, 0x0);
        write_overlay_cmd(&mut engine, 3, 0x0);
        let block = engine.block_end().unwrap();

        engine.block_run(block).unwrap();
        engine.block_run(block).unwrap();
        let sp = engine.syncpoint().unwrap();
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert_eq!(
            consumer.trace(),
            &[
                Observed::Overlay { id: 2, command: 0x0 },
                Observed::Overlay { id: 3, command: 0x0 },
                Observed::Overlay { id: 2, command: 0x0 },
                Observed::Overlay { id: 3, command: 0x0 },
                Observed::Syncpoint(sp),
            ]
        );
        engine.block_free(block).unwrap();
    }

    #[test]
    fn hp_preemption_interleaves_between_normal_commands() {
        // The cosim batches every write made before a `drive()` call, so
        // there is no way for a single `run()` to observe "HP was opened
        // after B, before C" unless the test itself draws that line: run
        // once with only A and B queued (the consumer parks at the
        // terminator right after B, exactly as it would on real hardware
        // before the HP session existed), *then* queue the HP session and
        // C and run again. See the module docs on `crate::sim` for why.
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();
        write_overlay_cmd(&mut engine, 2, 0xA); // A
        write_overlay_cmd(&mut engine, 2, 0xB); // B
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        engine.hp_begin().unwrap();
        {
            let mut w = engine.begin(WORD_SIZE).unwrap();
            w.bytes()[0] = command::header(2, 0xC); // H1, same overlay as B
            w.commit();
        }
        engine.hp_end().unwrap();

        write_overlay_cmd(&mut engine, 2, 0xD); // C, after HP leaves
        engine.flush();

        drive(&mut engine, &mut consumer);

        assert_eq!(
            consumer.trace(),
            &[
                Observed::Overlay { id: 2, command: 0xA },
                Observed::Overlay { id: 2, command: 0xB },
                Observed::HpEnter,
                Observed::Overlay { id: 2, command: 0xC },
                Observed::HpLeave,
                Observed::Overlay { id: 2, command: 0xD },
            ]
        );
    }

    #[test]
    fn signal_rejects_engine_reserved_bits() {
        let mut engine = Engine::new(SimBackend::new());
        assert_eq!(engine.signal(signal_bits::BUFFER_DONE), Err(CleError::SignalReserved));
        assert!(engine.signal(0b101).is_ok());
    }

    #[test]
    fn syncpoint_is_rejected_while_recording() {
        let mut engine = Engine::new(SimBackend::new());
        engine.block_begin().unwrap();
        assert_eq!(engine.syncpoint(), Err(CleError::SyncInBlock));
        // The rejected call must not have burned an id.
        engine.block_end().unwrap();
        let id = engine.syncpoint().unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn block_begin_is_rejected_while_hp_active() {
        let mut engine = Engine::new(SimBackend::new());
        engine.hp_begin().unwrap();
        assert_eq!(engine.block_begin(), Err(CleError::HpActive));
        engine.hp_end().unwrap();
    }

    #[test]
    fn hp_begin_is_rejected_while_recording() {
        let mut engine = Engine::new(SimBackend::new());
        engine.block_begin().unwrap();
        assert_eq!(engine.hp_begin(), Err(CleError::RecordingActive));
    }

    #[test]
    fn dma_command_round_trips_through_the_sim_consumer() {
        let mut engine = Engine::new(SimBackend::new());
        engine.dma_to_local(0x1000, 0x80100000, 256, false).unwrap();
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert_eq!(
            consumer.trace(),
            &[Observed::Dma { to_local: true, is_async: false, local_addr: 0x1000, shared_addr: 0x80100000, len: 256 }]
        );
    }

    #[test]
    fn dma_rejects_misaligned_requests() {
        let mut engine = Engine::new(SimBackend::new());
        assert_eq!(engine.dma_to_local(1, 0x80100000, 256, false), Err(CleError::DmaMisaligned));
    }

    #[test]
    fn running_an_overlay_command_marks_it_resident_for_future_register_calls() {
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();
        write_overlay_cmd(&mut engine, 2, 0x0);
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert_eq!(consumer.resident(), Some(2));
        assert_eq!(engine.register_overlay(2, overlay([1; 16])), Err(CleError::OverlayInUse));
    }

    #[test]
    fn nested_blocks_to_depth_eight_succeed() {
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();

        // Innermost block (b8): a single command, no further calls.
        engine.block_begin().unwrap();
        write_overlay_cmd(&mut engine, 2, 8);
        let mut handle = engine.block_end().unwrap();

        // Wrap seven more times: b7 calls b8, b6 calls b7, ..., b1 calls
        // b2. Calling b1 from the ring is the 8th and final call edge,
        // landing exactly at MAX_BLOCK_DEPTH.
        for cmd in (1u8..=7).rev() {
            engine.block_begin().unwrap();
            engine.block_run(handle).unwrap();
            write_overlay_cmd(&mut engine, 2, cmd);
            handle = engine.block_end().unwrap();
        }

        engine.block_run(handle).unwrap();
        let sp = engine.syncpoint().unwrap();
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert!(consumer.halted().is_none());
        assert_eq!(consumer.trace().last(), Some(&Observed::Syncpoint(sp)));
        assert_eq!(consumer.trace().len(), 9); // 8 calls deep + the syncpoint
    }

    #[test]
    fn nesting_past_eight_levels_halts_with_stack_overflow() {
        let mut engine = Engine::new(SimBackend::new());
        engine.register_overlay(2, overlay([1; 16])).unwrap();

        engine.block_begin().unwrap();
        write_overlay_cmd(&mut engine, 2, 9);
        let mut handle = engine.block_end().unwrap();

        // Eight more wrapping levels: nine call edges total from the ring.
        for cmd in (1u8..=8).rev() {
            engine.block_begin().unwrap();
            engine.block_run(handle).unwrap();
            write_overlay_cmd(&mut engine, 2, cmd);
            handle = engine.block_end().unwrap();
        }

        engine.block_run(handle).unwrap();
        engine.flush();

        let mut consumer = SimConsumer::new();
        drive(&mut engine, &mut consumer);

        assert_eq!(consumer.halted(), Some(CleError::BlockStackOverflow));
    }
}
