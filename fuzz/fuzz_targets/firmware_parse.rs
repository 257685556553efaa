#![no_main]
// Firmware container fuzzer
// Drives arbitrary bytes through header validation, section iteration,
// and resource entry decoding; none of it may panic

use libfuzzer_sys::fuzz_target;
use remoteproc::firmware::{FirmwareImage, ResourceEntry, SectionKind, RESOURCE_ENTRY_SIZE};

fuzz_target!(|data: &[u8]| {
    let Ok(image) = FirmwareImage::parse(data) else {
        return;
    };
    let _ = image.version();
    let _ = image.header_text();

    for section in image.sections() {
        let Ok(section) = section else {
            // iteration stops at the first error
            break;
        };
        // headers must re-encode without loss
        let reencoded = section.header.encode();
        assert_eq!(
            SectionKind::from_raw(u32::from_le_bytes(reencoded[0..4].try_into().unwrap())),
            section.header.kind
        );
        assert_eq!(section.header.len as usize, section.content.len());

        if section.header.kind == SectionKind::Resource {
            for chunk in section.content.chunks_exact(RESOURCE_ENTRY_SIZE) {
                let entry = ResourceEntry::decode(chunk.try_into().unwrap());
                let _ = entry.name.len();
            }
        }
    }
});
