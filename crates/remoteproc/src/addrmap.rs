//! Device-address translation
//!
//! Remote processors see their own address space. A platform may register a
//! table mapping device-address ranges to host physical addresses; absent a
//! table, addresses pass through unchanged as long as they fit the host.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One device-to-host address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMapEntry {
    /// Start of the range as seen by the remote processor
    pub da: u64,
    /// Host physical address backing the range
    pub pa: u64,
    /// Range length in bytes
    pub size: u64,
}

impl AddressMapEntry {
    pub fn new(da: u64, pa: u64, size: u64) -> Self {
        Self { da, pa, size }
    }

    fn contains(&self, da: u64) -> bool {
        da >= self.da && da - self.da < self.size
    }
}

/// Validated address map, immutable after registration
///
/// Ranges must not overlap in device-address space. Tables produced in the
/// C style may end with a zero-size sentinel entry; construction stops at
/// the sentinel. Serialized as a plain entry list; deserialization
/// revalidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<AddressMapEntry>", into = "Vec<AddressMapEntry>")]
pub struct AddressMap {
    entries: Vec<AddressMapEntry>,
}

impl TryFrom<Vec<AddressMapEntry>> for AddressMap {
    type Error = Error;

    fn try_from(table: Vec<AddressMapEntry>) -> Result<Self> {
        Self::new(table)
    }
}

impl From<AddressMap> for Vec<AddressMapEntry> {
    fn from(map: AddressMap) -> Self {
        map.entries
    }
}

impl AddressMap {
    pub fn new(table: Vec<AddressMapEntry>) -> Result<Self> {
        let end = table
            .iter()
            .position(|e| e.size == 0)
            .unwrap_or(table.len());
        let entries = table[..end].to_vec();

        for entry in &entries {
            if entry.da.checked_add(entry.size).is_none()
                || entry.pa.checked_add(entry.size).is_none()
            {
                return Err(Error::InvalidAddress { da: entry.da });
            }
        }
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if a.da < b.da + b.size && b.da < a.da + a.size {
                    return Err(Error::OverlappingMap { da: a.da.max(b.da) });
                }
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[AddressMapEntry] {
        &self.entries
    }

    /// Translate a device address to a host physical address
    pub fn translate(&self, da: u64) -> Result<u64> {
        self.entries
            .iter()
            .find(|e| e.contains(da))
            .map(|e| e.pa + (da - e.da))
            .ok_or(Error::InvalidAddress { da })
    }
}

/// Translate `da` through `maps`, or identity when no map is registered
///
/// Identity mode succeeds only for addresses representable on the host.
pub fn translate(maps: Option<&AddressMap>, da: u64) -> Result<u64> {
    match maps {
        Some(map) => map.translate(da),
        None if da <= usize::MAX as u64 => Ok(da),
        None => Err(Error::InvalidAddress { da }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_map() -> AddressMap {
        AddressMap::new(vec![
            AddressMapEntry::new(0x1000, 0x9000_0000, 0x1000),
            AddressMapEntry::new(0x4000, 0xa000_0000, 0x2000),
        ])
        .unwrap()
    }

    #[test]
    fn test_translate_within_range() {
        let map = sample_map();
        assert_eq!(map.translate(0x1000).unwrap(), 0x9000_0000);
        assert_eq!(map.translate(0x1fff).unwrap(), 0x9000_0fff);
        assert_eq!(map.translate(0x4800).unwrap(), 0xa000_0800);
    }

    #[test]
    fn test_translate_miss() {
        let map = sample_map();
        assert!(matches!(
            map.translate(0x2000),
            Err(Error::InvalidAddress { da: 0x2000 })
        ));
        assert!(matches!(map.translate(0), Err(Error::InvalidAddress { .. })));
    }

    #[test]
    fn test_identity_mode() {
        assert_eq!(translate(None, 0x10_0000).unwrap(), 0x10_0000);
        if usize::BITS < 64 {
            assert!(translate(None, u64::MAX).is_err());
        }
    }

    #[test]
    fn test_overlap_rejected() {
        let result = AddressMap::new(vec![
            AddressMapEntry::new(0x1000, 0x9000_0000, 0x2000),
            AddressMapEntry::new(0x2000, 0xa000_0000, 0x1000),
        ]);
        assert!(matches!(result, Err(Error::OverlappingMap { da: 0x2000 })));
    }

    #[test]
    fn test_sentinel_terminates_table() {
        let map = AddressMap::new(vec![
            AddressMapEntry::new(0x1000, 0x9000_0000, 0x1000),
            AddressMapEntry::new(0, 0, 0),
            AddressMapEntry::new(0x1000, 0xb000_0000, 0x1000),
        ])
        .unwrap();
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.translate(0x1000).unwrap(), 0x9000_0000);
    }

    #[test]
    fn test_wrapping_range_rejected() {
        let result = AddressMap::new(vec![AddressMapEntry::new(u64::MAX - 4, 0, 16)]);
        assert!(matches!(result, Err(Error::InvalidAddress { .. })));
    }

    proptest! {
        // Translation is linear within a mapped range
        #[test]
        fn prop_translation_linear(off in 0u64..0x1000) {
            let map = sample_map();
            prop_assert_eq!(map.translate(0x1000 + off).unwrap(), 0x9000_0000 + off);
        }

        // Distinct device addresses never translate to the same host address
        #[test]
        fn prop_translation_injective(a in 0x1000u64..0x2000, b in 0x4000u64..0x6000) {
            let map = sample_map();
            prop_assert_ne!(map.translate(a).unwrap(), map.translate(b).unwrap());
        }
    }
}
