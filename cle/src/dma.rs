//! DMA bridge (component H): transfers between shared RAM and the
//! consumer's local memory, enqueued as engine commands.
//!
//! Alignment is the one thing this module enforces; overlap semantics
//! between concurrent transfers are the caller's responsibility, per
//! the data model.

use crate::config::DMA_ALIGNMENT;
use crate::error::{CleError, CleResult};

fn check_alignment(local_addr: u32, shared_addr: u32, len: usize) -> CleResult<()> {
    let aligned = |v: usize| v % DMA_ALIGNMENT == 0;
    if !aligned(local_addr as usize) || !aligned(shared_addr as usize) || !aligned(len) {
        return Err(CleError::DmaMisaligned);
    }
    Ok(())
}

/// A validated transfer request, ready to be written as a `dma`
/// engine command and, for synchronous transfers, stalled on.
pub struct Transfer {
    pub local_addr: u32,
    pub shared_addr: u32,
    pub len: usize,
    pub to_local: bool,
    pub is_async: bool,
}

impl Transfer {
    pub fn new(local_addr: u32, shared_addr: u32, len: usize, to_local: bool, is_async: bool) -> CleResult<Self> {
        check_alignment(local_addr, shared_addr, len)?;
        Ok(Self { local_addr, shared_addr, len, to_local, is_async })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misaligned_length_is_rejected() {
        assert_eq!(Transfer::new(0, 8, 7, true, false).unwrap_err(), CleError::DmaMisaligned);
    }

    #[test]
    fn misaligned_address_is_rejected() {
        assert_eq!(Transfer::new(3, 8, 8, true, false).unwrap_err(), CleError::DmaMisaligned);
    }

    #[test]
    fn aligned_request_is_accepted() {
        let t = Transfer::new(16, 32, 64, false, true).unwrap();
        assert!(!t.to_local);
        assert!(t.is_async);
    }
}
