//! Section placement
//!
//! Walks the section stream, translating each device address and copying
//! the payload through a temporary host mapping. Resource sections are
//! additionally dispatched to the resource interpreter.

use super::image::{SectionIter, SectionKind};
use super::resource;
use crate::addrmap::{translate, AddressMap};
use crate::error::{Error, Result};
use crate::memory::PhysMemory;
use crate::trace::TraceBinding;
use tracing::debug;

/// Mutable state threaded through one firmware load
pub(crate) struct LoadContext<'a> {
    pub maps: Option<&'a AddressMap>,
    pub memory: &'a dyn PhysMemory,
    pub traces: &'a mut Vec<TraceBinding>,
    pub boot_addr: Option<u64>,
}

/// Place every section of the stream; returns the boot address requested by
/// the resource table, 0 when none was requested
pub(crate) fn load_sections(sections: SectionIter<'_>, ctx: &mut LoadContext<'_>) -> Result<u64> {
    for section in sections {
        let section = section?;
        let len = section.content.len();
        if len == 0 {
            debug!("Skipping empty section at {:#x}", section.header.da);
            continue;
        }

        let pa = translate(ctx.maps, section.header.da)?;
        let mut region = ctx
            .memory
            .map(pa, len)
            .map_err(|source| Error::MappingFailed { pa, source })?;
        region
            .write(0, section.content)
            .map_err(|source| Error::MappingFailed { pa, source })?;
        debug!(
            "Placed {:?} section: {len} bytes at da {:#x} -> pa {pa:#x}",
            section.header.kind, section.header.da
        );

        if section.header.kind == SectionKind::Resource {
            // The interpreter reads back what was just placed, so it sees
            // exactly the bytes the remote core will see.
            let mut staged = vec![0u8; len];
            region
                .read(0, &mut staged)
                .map_err(|source| Error::MappingFailed { pa, source })?;
            resource::interpret(&staged, ctx)?;
        }
        // region drops here, releasing the temporary mapping
    }
    Ok(ctx.boot_addr.unwrap_or(0))
}
