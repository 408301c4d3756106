//! Block recorder (component E).
//!
//! `block_begin` redirects command writes away from the ring and into
//! a growable scratch region; `block_end` seals it behind an opaque
//! handle. `block_run` never touches the scratch region directly — it
//! only resolves a handle to the address the engine embeds in a
//! `call-block` command on whatever is the current write target
//! (ring, HP ring, or an outer block being recorded).

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::command::{self, engine_cmd};
use crate::config::WORD_SIZE;
use crate::error::{CleError, CleResult};
use crate::sync::AtomicRefCount;

/// Opaque replayable handle to a recorded command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockHandle(u32);

struct Entry {
    storage: Box<[u8]>,
    ref_count: AtomicRefCount,
}

/// Accumulates writes for the block currently being recorded.
struct Builder {
    bytes: Vec<u8>,
}

/// Owns every live block's storage plus, while recording, the in-flight
/// builder. One instance lives inside [`crate::engine::Engine`].
pub struct BlockRecorder {
    blocks: BTreeMap<u32, Entry>,
    next_id: u32,
    building: Option<Builder>,
}

impl BlockRecorder {
    pub const fn new() -> Self {
        Self { blocks: BTreeMap::new(), next_id: 1, building: None }
    }

    pub fn is_recording(&self) -> bool {
        self.building.is_some()
    }

    /// Start redirecting writes into a scratch region. Rejects a second
    /// concurrent recording session; HP-active rejection is the
    /// caller's (`Engine`'s) responsibility since this type has no
    /// notion of the HP lane.
    pub fn block_begin(&mut self) -> CleResult<()> {
        if self.building.is_some() {
            return Err(CleError::RecordingActive);
        }
        self.building = Some(Builder { bytes: Vec::new() });
        Ok(())
    }

    /// The scratch region currently being recorded into, for writes
    /// that target it instead of a ring.
    pub fn recording_bytes(&mut self) -> Option<&mut Vec<u8>> {
        self.building.as_mut().map(|b| &mut b.bytes)
    }

    /// Append `return-from-block`, seal the region, and hand back a
    /// handle usable with [`BlockRecorder::block_run`] any number of
    /// times until [`BlockRecorder::block_free`] releases it.
    pub fn block_end(&mut self) -> CleResult<BlockHandle> {
        let mut builder = self.building.take().ok_or(CleError::RecordingActive)?;
        let header = command::header(command::ENGINE_OVERLAY, engine_cmd::RETURN_FROM_BLOCK);
        builder.bytes.push(header);
        builder.bytes.resize(builder.bytes.len() + (WORD_SIZE - 1), 0);

        let id = self.next_id;
        self.next_id += 1;
        self.blocks.insert(
            id,
            Entry { storage: builder.bytes.into_boxed_slice(), ref_count: AtomicRefCount::new(1) },
        );
        Ok(BlockHandle(id))
    }

    /// Resolve `handle` to its storage address and length, bumping its
    /// reference count when the call is itself being recorded into
    /// another block (the nesting case the data model's `ref_count`
    /// exists for: the callee must outlive the block calling it).
    pub fn resolve_for_call(&mut self, handle: BlockHandle, nested: bool) -> CleResult<(*const u8, usize)> {
        let entry = self.blocks.get(&handle.0).ok_or(CleError::InvalidOverlay)?;
        if nested {
            entry.ref_count.inc();
        }
        Ok((entry.storage.as_ptr(), entry.storage.len()))
    }

    /// Reverse-lookup used by the software consumer to turn the
    /// device address embedded in a `call-block` command back into
    /// the block's storage. Read-only: replay never changes ref counts.
    pub fn lookup(&self, address: u32) -> Option<(*const u8, usize)> {
        self.blocks.values().find_map(|entry| {
            let ptr = entry.storage.as_ptr();
            if ptr as usize as u32 == address {
                Some((ptr, entry.storage.len()))
            } else {
                None
            }
        })
    }

    /// Release one reference to `handle`. Storage is freed once the
    /// count reaches zero. Freeing a handle whose calls are still
    /// embedded in another live block is undefined and left to the
    /// caller to avoid, per the data model's documented lifecycle.
    pub fn block_free(&mut self, handle: BlockHandle) -> CleResult<()> {
        let remaining = match self.blocks.get(&handle.0) {
            Some(entry) => entry.ref_count.dec(),
            None => return Err(CleError::InvalidOverlay),
        };
        if remaining == 0 {
            self.blocks.remove(&handle.0);
        }
        Ok(())
    }
}

impl Default for BlockRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_block_begin_is_rejected() {
        let mut rec = BlockRecorder::new();
        rec.block_begin().unwrap();
        assert_eq!(rec.block_begin(), Err(CleError::RecordingActive));
    }

    #[test]
    fn block_end_seals_storage_ending_in_return_from_block() {
        let mut rec = BlockRecorder::new();
        rec.block_begin().unwrap();
        rec.recording_bytes().unwrap().extend_from_slice(&[0xAA, 0, 0, 0]);
        let handle = rec.block_end().unwrap();
        let (ptr, len) = rec.resolve_for_call(handle, false).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
        assert_eq!(bytes[0], 0xAA);
        let (overlay, cmd) = command::decode(bytes[4]);
        assert_eq!(overlay, command::ENGINE_OVERLAY);
        assert_eq!(cmd, engine_cmd::RETURN_FROM_BLOCK);
    }

    #[test]
    fn freeing_an_unreferenced_block_removes_its_storage() {
        let mut rec = BlockRecorder::new();
        rec.block_begin().unwrap();
        let handle = rec.block_end().unwrap();
        rec.block_free(handle).unwrap();
        assert_eq!(rec.resolve_for_call(handle, false), Err(CleError::InvalidOverlay));
    }

    #[test]
    fn nested_resolution_keeps_the_callee_alive_past_one_free() {
        let mut rec = BlockRecorder::new();
        rec.block_begin().unwrap();
        let inner = rec.block_end().unwrap();

        rec.block_begin().unwrap();
        rec.resolve_for_call(inner, true).unwrap(); // recorded call from the outer block
        let _outer = rec.block_end().unwrap();

        // One free (the handle the caller holds) isn't enough: the
        // nested call bumped the count to 2.
        rec.block_free(inner).unwrap();
        assert!(rec.resolve_for_call(inner, false).is_ok());
        rec.block_free(inner).unwrap();
        assert_eq!(rec.resolve_for_call(inner, false), Err(CleError::InvalidOverlay));
    }
}
