//! Remote processor lifecycle and firmware loading framework
//!
//! Host-side library that:
//! - Registers remote processors (DSPs, co-processors) with a platform backend
//! - Parses RPRC firmware containers and places sections into host-visible memory
//! - Interprets the embedded resource table (trace buffers, boot address)
//! - Drives the backend through a reference-counted acquire/release state machine
//!
//! [`Registry`] is the entry point: `register` a processor, `get` a handle to
//! boot it on demand, `put` the handle when done. The firmware load runs on a
//! spawned task; callers observe progress through the status snapshots and the
//! broadcast event stream.

pub mod addrmap;
pub mod backend;
pub mod error;
pub mod fetch;
pub mod firmware;
pub mod memory;
pub mod rproc;
pub mod trace;

#[cfg(test)]
pub(crate) mod testutil;

pub use addrmap::{AddressMap, AddressMapEntry};
pub use backend::{BackendModule, RprocOps};
pub use error::{Error, Result};
pub use fetch::{FirmwareFetcher, FsFetcher};
pub use firmware::{FirmwareImage, SectionKind};
pub use memory::{DevMem, MappedRegion, PhysMemory};
pub use rproc::{
    Registry, RprocConfig, RprocEvent, RprocHandle, RprocState, RprocStatus, TraceInfo,
};
