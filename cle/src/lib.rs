//! `rspq` — command-list scheduler for the N64 RSP coprocessor.
//!
//! A single CPU producer streams variable-length commands through a
//! double-buffered ring consumed by the RSP. The scheduler multiplexes
//! code overlays onto that one consumer, supports recorded command
//! blocks with nested calls, interleaves a high-priority lane that
//! preempts the normal stream with bounded latency, and exposes
//! syncpoints for CPU/coprocessor rendezvous without a full barrier.
//!
//! [`Engine`] is the crate's single public entry point: it owns the
//! rings, the overlay registry, the block recorder, the high-priority
//! lane and the syncpoint tracker, and is generic over a [`Backend`]
//! so the same logic runs against real hardware or, with the `sim`
//! feature (always on for `cfg(test)`), against an in-crate software
//! consumer used by this crate's own test suite.
//!
//! Peripheral drivers, the overlay programs themselves, filesystems,
//! cartridge probing, controller input and ROM packaging are explicitly
//! out of scope — they are this crate's collaborators, not its
//! contents.
// `no_std` in production; the host test harness (`cargo test`) needs
// `std` to run at all, so it's only dropped outside `cfg(test)` — the
// same shape as the pack's other `no_std`-with-a-std-escape-hatch
// crates, just gated on `test` instead of a feature flag.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backend;
pub mod block;
pub mod command;
pub mod config;
pub mod diag;
pub mod dispatch;
pub mod dma;
mod engine;
pub mod error;
pub mod hp;
pub mod overlay;
pub mod ring;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod sync;
pub mod syncpoint;

pub use backend::{Backend, BufferId, RingId};
pub use block::BlockHandle;
pub use engine::{CommandWriter, Engine};
pub use error::{CleError, CleResult};
pub use overlay::OverlayDescriptor;
