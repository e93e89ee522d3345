// SPDX-License-Identifier: MPL-2.0

//! A DMA address-space registry and translator for userspace device
//! emulation.
//!
//! An external collaborator (typically a VFIO-over-socket server) tells
//! this crate which guest physical ranges are currently backed by which
//! host file descriptors. The emulated device then asks [`DmaController`]
//! to translate guest DMA addresses into host-accessible byte ranges, maps
//! the resulting [`SgEntry`] list to get real pointers, and — when live
//! migration is active — relies on the controller to record which guest
//! pages were written.
//!
//! The crate does not own the transport that delivers registrations, nor
//! does it do bounce-buffering or cross-process DMA; see the module docs
//! on [`DmaController`] for the exact contract.

mod controller;
mod dirty;
mod error;
mod hint;
mod map;
mod mapper;
mod region;
mod table;
mod translate;

pub use controller::DmaController;
pub use dirty::DirtyBitmap;
pub use error::Error;
pub use map::IoVec;
pub use region::{DmaAddr, Prot, Region};
pub use translate::SgEntry;

/// Result alias used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;
