//! Resource table interpretation
//!
//! A RESOURCE section carries fixed-size entries describing services the
//! firmware requests from the host. This revision handles TRACE and
//! BOOTADDR; carveouts, devmem windows, devices, and IRQs are parsed and
//! ignored. A trailing fragment smaller than one entry is ignored.

use super::loader::LoadContext;
use crate::addrmap::translate;
use crate::error::{Error, Result};
use crate::trace::{TraceBinding, MAX_TRACE_BUFFERS};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

/// Wire stride of one resource entry
///
/// The container is generated from a naturally-aligned C struct, so four
/// padding bytes sit between `type` and `da`.
pub const RESOURCE_ENTRY_SIZE: usize = 80;

const NAME_OFFSET: usize = 32;
const NAME_LEN: usize = 48;

/// Resource kind encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Carveout,
    Devmem,
    Device,
    Irq,
    Trace,
    BootAddr,
    Unknown(u32),
}

impl ResourceKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ResourceKind::Carveout,
            1 => ResourceKind::Devmem,
            2 => ResourceKind::Device,
            3 => ResourceKind::Irq,
            4 => ResourceKind::Trace,
            5 => ResourceKind::BootAddr,
            other => ResourceKind::Unknown(other),
        }
    }
}

/// One decoded resource entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub kind: ResourceKind,
    pub da: u64,
    pub pa: u64,
    pub len: u32,
    pub flags: u32,
    /// NUL-padded identifier chosen by the firmware author
    pub name: String,
}

impl ResourceEntry {
    pub fn decode(bytes: &[u8; RESOURCE_ENTRY_SIZE]) -> Self {
        let raw_name = &bytes[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        Self {
            kind: ResourceKind::from_raw(LittleEndian::read_u32(&bytes[0..4])),
            da: LittleEndian::read_u64(&bytes[8..16]),
            pa: LittleEndian::read_u64(&bytes[16..24]),
            len: LittleEndian::read_u32(&bytes[24..28]),
            flags: LittleEndian::read_u32(&bytes[28..32]),
            name: String::from_utf8_lossy(&raw_name[..name_end]).into_owned(),
        }
    }
}

/// Walk a resource table, attaching trace buffers and recording the boot
/// address into `ctx`
///
/// Rollback of partially-attached trace buffers on failure is the caller's
/// responsibility; the whole load aborts anyway.
pub(crate) fn interpret(payload: &[u8], ctx: &mut LoadContext<'_>) -> Result<()> {
    for chunk in payload.chunks_exact(RESOURCE_ENTRY_SIZE) {
        let entry = ResourceEntry::decode(chunk.try_into().expect("exact-size chunk"));
        match entry.kind {
            ResourceKind::Trace => attach_trace(&entry, ctx)?,
            ResourceKind::BootAddr => {
                if let Some(existing) = ctx.boot_addr {
                    warn!(
                        "Duplicate boot address entry '{}' ({:#x}), keeping {:#x}",
                        entry.name, entry.da, existing
                    );
                } else {
                    debug!("Boot address {:#x} from entry '{}'", entry.da, entry.name);
                    ctx.boot_addr = Some(entry.da);
                }
            }
            ResourceKind::Carveout
            | ResourceKind::Devmem
            | ResourceKind::Device
            | ResourceKind::Irq => {
                debug!(
                    "Resource '{}' ({:?}) not handled in this revision",
                    entry.name, entry.kind
                );
            }
            ResourceKind::Unknown(raw) => {
                debug!("Ignoring unknown resource kind {raw}");
            }
        }
    }
    Ok(())
}

fn attach_trace(entry: &ResourceEntry, ctx: &mut LoadContext<'_>) -> Result<()> {
    if ctx.traces.len() >= MAX_TRACE_BUFFERS {
        return Err(Error::TooManyTraces {
            limit: MAX_TRACE_BUFFERS,
        });
    }
    let pa = translate(ctx.maps, entry.da)?;
    let region = ctx
        .memory
        .map(pa, entry.len as usize)
        .map_err(|source| Error::MappingFailed { pa, source })?;
    let slot = ctx.traces.len();
    debug!(
        "Attached trace buffer '{}' as trace{slot}, {} bytes at {pa:#x}",
        entry.name, entry.len
    );
    ctx.traces.push(TraceBinding::new(slot, pa, region));
    Ok(())
}
