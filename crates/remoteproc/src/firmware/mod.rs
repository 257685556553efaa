//! Firmware image pipeline
//!
//! Parses the packed RPRC container, iterates its sections lazily, places
//! section bytes through the address map into host-visible memory, and
//! dispatches the embedded resource table.

pub mod image;
pub(crate) mod loader;
pub mod resource;

pub use image::{FirmwareImage, Section, SectionHeader, SectionIter, SectionKind, MAGIC};
pub use resource::{ResourceEntry, ResourceKind, RESOURCE_ENTRY_SIZE};
