#![no_main]

//! Builds a plausible Objective-C image from fuzzer input so the extractor
//! sees well-formed headers with hostile record contents.

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use objcray_formats::macho::builder::{self, ChainedFixupsBuilder, MachOBuilder, NO_FIXUPS};
use objcray_formats::macho::{MachO, CPU_TYPE_ARM, CPU_TYPE_ARM64, VM_PROT_READ, VM_PROT_WRITE};
use objcray_formats::{Bitness, PointerFormat};
use objcray_objc::{extract, ExtractOptions};

const BASE_64: u64 = 0x1_0000_0000;
const BASE_32: u64 = 0x4000;
const SEGMENT_SIZE: u64 = 0x4000;

#[derive(Debug, Arbitrary)]
struct FuzzedImage {
    is_64bit: bool,
    big_endian: bool,
    encrypt: Option<(u16, u16)>,
    image_info_flags: Option<u32>,
    classes: u8,
    categories: u8,
    protocols: u8,
    /// Contents of `__TEXT` past the header page.
    text: Vec<u8>,
    /// Contents of `__DATA`.
    data: Vec<u8>,
    /// Pointer slots patched into `__DATA`.
    pointers: Vec<FuzzedPointer>,
    imports: Vec<String>,
}

#[derive(Debug, Arbitrary)]
struct FuzzedPointer {
    /// Slot index within `__DATA`, in pointer units.
    slot: u16,
    /// Target offset from the image base.
    target: u16,
    bind: Option<u8>,
}

impl FuzzedImage {
    fn to_bytes(&self) -> Vec<u8> {
        let (bitness, cputype, base) = if self.is_64bit {
            (Bitness::Bits64, CPU_TYPE_ARM64, BASE_64)
        } else {
            (Bitness::Bits32, CPU_TYPE_ARM, BASE_32)
        };
        let ptr = bitness.pointer_size() as u64;
        let data_addr = base + SEGMENT_SIZE;

        let mut b = MachOBuilder::new(bitness, cputype);
        if self.big_endian {
            b = b.big_endian();
        }
        b.add_segment("__TEXT", base, SEGMENT_SIZE, 0, SEGMENT_SIZE, VM_PROT_READ);
        let data = b.add_segment(
            "__DATA",
            data_addr,
            SEGMENT_SIZE,
            SEGMENT_SIZE,
            SEGMENT_SIZE,
            VM_PROT_READ | VM_PROT_WRITE,
        );
        b.add_segment(
            "__LINKEDIT",
            base + 2 * SEGMENT_SIZE,
            0x1000,
            2 * SEGMENT_SIZE,
            0x1000,
            VM_PROT_READ,
        );
        b.add_dylib("/usr/lib/libobjc.A.dylib");

        // Lists sit back to back at the start of __DATA
        let mut cursor = data_addr;
        for (name, count) in [
            ("__objc_classlist", self.classes),
            ("__objc_catlist", self.categories),
            ("__objc_protolist", self.protocols),
        ] {
            let size = (count % 16) as u64 * ptr;
            b.add_section(data, name, cursor, size);
            cursor += size;
        }
        if self.image_info_flags.is_some() {
            b.add_section(data, "__objc_imageinfo", cursor, 8);
        }
        if let Some((off, size)) = self.encrypt {
            b.add_encryption_info(off as u32, size as u32, 1);
        }

        let text_len = self.text.len().min(SEGMENT_SIZE as usize - 0x1000);
        b.write_bytes(0x1000, &self.text[..text_len]);
        let data_len = self.data.len().min(SEGMENT_SIZE as usize);
        b.write_bytes(SEGMENT_SIZE, &self.data[..data_len]);
        if let Some(flags) = self.image_info_flags {
            b.write_u32(cursor - base + 4, flags);
        }

        let mut slots: Vec<&FuzzedPointer> = self.pointers.iter().collect();
        slots.sort_by_key(|p| p.slot);
        slots.dedup_by_key(|p| p.slot);
        slots.retain(|p| (p.slot as u64 + 1) * ptr <= SEGMENT_SIZE);

        if self.is_64bit {
            let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr64, 3);
            let ordinals: Vec<u32> = self
                .imports
                .iter()
                .take(8)
                .map(|name| fixups.import(name, 1, false))
                .collect();
            for (i, p) in slots.iter().enumerate() {
                let offset = p.slot as u64 * ptr;
                let next = slots.get(i + 1).map_or(0, |n| (n.slot - p.slot) as u64 * ptr / 4);
                let raw = match (p.bind, ordinals.is_empty()) {
                    (Some(which), false) => {
                        let ordinal = ordinals[which as usize % ordinals.len()];
                        builder::ptr64_bind(ordinal, 0, next)
                    }
                    _ => builder::ptr64_rebase(base + p.target as u64, next),
                };
                b.write_u64(SEGMENT_SIZE + offset, raw);
            }
            // Chains span one 16 KiB page; the next field reaches 16 KiB.
            let start = slots.first().map_or(NO_FIXUPS, |p| (p.slot as u64 * ptr) as u16);
            fixups.segment(data, SEGMENT_SIZE, &[start]);
            b.add_chained_fixups(2 * SEGMENT_SIZE, &fixups.build());
        } else {
            for p in &slots {
                b.write_pointer(SEGMENT_SIZE + p.slot as u64 * ptr, base + p.target as u64);
            }
        }

        b.build()
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(fuzzed) = FuzzedImage::arbitrary(&mut Unstructured::new(data)) else {
        return;
    };
    let bytes = fuzzed.to_bytes();
    let Ok(macho) = MachO::parse(&bytes) else {
        return;
    };

    for slide in [0, 0x4000] {
        let options = ExtractOptions {
            slide,
            ..ExtractOptions::default()
        };
        let metadata = extract(&macho, options);
        for class in &metadata.classes {
            assert!(class.address >= slide);
        }
    }
});
