//! RPRC container parsing
//!
//! Layout: `magic[4]='RPRC', version:u32, header_len:u32`, `header_len`
//! bytes of free-form text, then a contiguous sequence of sections, each
//! `{type:u32, da:u64, len:u32}` followed by `len` payload bytes. All
//! numeric fields are little-endian; nothing is read by overlaying structs
//! on the buffer.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Container magic, first four bytes of every image
pub const MAGIC: [u8; 4] = *b"RPRC";

/// Fixed container header size: magic, version, header_len
pub const IMAGE_HEADER_SIZE: usize = 12;

/// Packed section header size: type, da, len
pub const SECTION_HEADER_SIZE: usize = 16;

/// Section type encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Resource table requesting host-side services
    Resource,
    /// Executable code
    Text,
    /// Initialized data
    Data,
    /// Unrecognized type, placed like data for forward compatibility
    Unknown(u32),
}

impl SectionKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => SectionKind::Resource,
            1 => SectionKind::Text,
            2 => SectionKind::Data,
            other => SectionKind::Unknown(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            SectionKind::Resource => 0,
            SectionKind::Text => 1,
            SectionKind::Data => 2,
            SectionKind::Unknown(other) => other,
        }
    }
}

/// Decoded section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub kind: SectionKind,
    /// Target address as seen by the remote processor
    pub da: u64,
    /// Payload length in bytes
    pub len: u32,
}

impl SectionHeader {
    /// Re-encode to the wire layout, byte-identical to what was parsed
    pub fn encode(&self) -> [u8; SECTION_HEADER_SIZE] {
        let mut out = [0u8; SECTION_HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.kind.as_raw());
        LittleEndian::write_u64(&mut out[4..12], self.da);
        LittleEndian::write_u32(&mut out[12..16], self.len);
        out
    }
}

/// One section: header plus a borrowed view of its payload
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    pub header: SectionHeader,
    pub content: &'a [u8],
}

/// A parsed firmware container
///
/// Borrows the fetched image; sections are decoded lazily by [`Self::sections`].
#[derive(Debug, Clone, Copy)]
pub struct FirmwareImage<'a> {
    version: u32,
    header: &'a [u8],
    sections: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
    /// Validate the container header and locate the section stream
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < IMAGE_HEADER_SIZE {
            return Err(Error::TooSmall { len: bytes.len() });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(Error::BadMagic { found: magic });
        }
        let version = LittleEndian::read_u32(&bytes[4..8]);
        let header_len = LittleEndian::read_u32(&bytes[8..12]) as usize;

        let rest = &bytes[IMAGE_HEADER_SIZE..];
        if rest.len() < header_len {
            return Err(Error::Truncated {
                needed: header_len,
                remaining: rest.len(),
            });
        }

        Ok(Self {
            version,
            header: &rest[..header_len],
            sections: &rest[header_len..],
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Raw free-form text header embedded by the image generator
    pub fn header(&self) -> &'a [u8] {
        self.header
    }

    pub fn header_text(&self) -> String {
        String::from_utf8_lossy(self.header).into_owned()
    }

    /// Lazy iterator over the image's sections
    pub fn sections(&self) -> SectionIter<'a> {
        SectionIter {
            rest: self.sections,
            failed: false,
        }
    }
}

/// Fallible section iterator; stops after the first error
pub struct SectionIter<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for SectionIter<'a> {
    type Item = Result<Section<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < SECTION_HEADER_SIZE {
            self.failed = true;
            return Some(Err(Error::Truncated {
                needed: SECTION_HEADER_SIZE,
                remaining: self.rest.len(),
            }));
        }

        let header = SectionHeader {
            kind: SectionKind::from_raw(LittleEndian::read_u32(&self.rest[0..4])),
            da: LittleEndian::read_u64(&self.rest[4..12]),
            len: LittleEndian::read_u32(&self.rest[12..16]),
        };
        let body = &self.rest[SECTION_HEADER_SIZE..];
        let len = header.len as usize;
        if body.len() < len {
            self.failed = true;
            return Some(Err(Error::Truncated {
                needed: len,
                remaining: body.len(),
            }));
        }

        self.rest = &body[len..];
        Some(Ok(Section {
            header,
            content: &body[..len],
        }))
    }
}
