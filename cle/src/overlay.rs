//! Overlay registry (component C).
//!
//! Up to 15 micro-kernels may be registered, each with a code image, a
//! data image, and a saved-state region in shared RAM. Commands carry
//! the target overlay in the high nibble of their header byte; the
//! registry never inspects command payloads, only routes by id.

use crate::config::{MAX_OVERLAYS, MAX_OVERLAY_ID};
use crate::error::{CleError, CleResult};

/// One registered overlay's images and bookkeeping.
///
/// `command_words` is a per-command-id table of word counts. A real
/// RSP overlay's own dispatch table knows this; the engine needs a
/// copy purely to know how many bytes to skip over a command it does
/// not otherwise understand (it never inspects the payload itself).
#[derive(Debug, Clone, Copy)]
pub struct OverlayDescriptor {
    pub code_addr: u32,
    pub code_size: usize,
    pub data_addr: u32,
    pub data_size: usize,
    pub saved_state_addr: u32,
    pub saved_state_size: usize,
    pub command_words: [u8; 16],
}

#[derive(Clone, Copy)]
struct Slot {
    descriptor: Option<OverlayDescriptor>,
}

const EMPTY_SLOT: Slot = Slot { descriptor: None };

/// Table of registered overlays, indexed by id (0 is reserved and
/// never populated). Tracks which id is currently resident on the
/// consumer so a re-registration of a resident id can be rejected.
pub struct OverlayRegistry {
    slots: [Slot; MAX_OVERLAYS],
    resident: Option<u8>,
}

impl OverlayRegistry {
    pub const fn new() -> Self {
        Self { slots: [EMPTY_SLOT; MAX_OVERLAYS], resident: None }
    }

    /// Bind `descriptor` to `id`. Multiple ids may point at distinct
    /// copies of the same image — useful when an overlay exposes more
    /// than 16 commands by registering under several ids.
    pub fn register(&mut self, id: u8, descriptor: OverlayDescriptor) -> CleResult<()> {
        if id == 0 || id > MAX_OVERLAY_ID {
            return Err(CleError::InvalidOverlay);
        }
        if self.resident == Some(id) {
            return Err(CleError::OverlayInUse);
        }
        self.slots[id as usize] = Slot { descriptor: Some(descriptor) };
        Ok(())
    }

    /// Address of `id`'s saved-state region, for hosts that want to
    /// prepare state while the overlay is known non-resident.
    pub fn state_addr(&self, id: u8) -> CleResult<u32> {
        self.descriptor(id).map(|d| d.saved_state_addr).ok_or(CleError::InvalidOverlay)
    }

    pub fn descriptor(&self, id: u8) -> Option<OverlayDescriptor> {
        self.slots.get(id as usize)?.descriptor
    }

    pub fn is_registered(&self, id: u8) -> bool {
        self.descriptor(id).is_some()
    }

    pub fn resident(&self) -> Option<u8> {
        self.resident
    }

    /// Mark `id` as the resident overlay, or clear residency with
    /// `None`. Called by the dispatcher after a save/load round-trip
    /// completes; not meaningful to callers outside the crate.
    pub(crate) fn set_resident(&mut self, id: Option<u8>) {
        self.resident = id;
    }
}

impl Default for OverlayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> OverlayDescriptor {
        OverlayDescriptor {
            code_addr: 0x1000,
            code_size: 256,
            data_addr: 0x2000,
            data_size: 64,
            saved_state_addr: 0x3000,
            saved_state_size: 64,
            command_words: [1; 16],
        }
    }

    #[test]
    fn register_rejects_overlay_zero_and_out_of_range_ids() {
        let mut reg = OverlayRegistry::new();
        assert_eq!(reg.register(0, descriptor()), Err(CleError::InvalidOverlay));
        assert_eq!(reg.register(16, descriptor()), Err(CleError::InvalidOverlay));
    }

    #[test]
    fn register_rejects_a_resident_id() {
        let mut reg = OverlayRegistry::new();
        reg.register(2, descriptor()).unwrap();
        reg.set_resident(Some(2));
        assert_eq!(reg.register(2, descriptor()), Err(CleError::OverlayInUse));
    }

    #[test]
    fn registering_a_non_resident_id_again_is_allowed() {
        let mut reg = OverlayRegistry::new();
        reg.register(2, descriptor()).unwrap();
        reg.set_resident(Some(3));
        assert!(reg.register(2, descriptor()).is_ok());
    }

    #[test]
    fn state_addr_reports_the_saved_state_region() {
        let mut reg = OverlayRegistry::new();
        reg.register(5, descriptor()).unwrap();
        assert_eq!(reg.state_addr(5), Ok(0x3000));
        assert_eq!(reg.state_addr(6), Err(CleError::InvalidOverlay));
    }
}
