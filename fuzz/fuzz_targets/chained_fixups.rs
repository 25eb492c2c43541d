#![no_main]

//! Feeds raw chain entries of every pointer format through the walker and
//! the resolver.

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use objcray_formats::macho::builder::{ChainedFixupsBuilder, MachOBuilder};
use objcray_formats::macho::{MachO, CPU_TYPE_ARM64, VM_PROT_READ, VM_PROT_WRITE};
use objcray_formats::{Bitness, PointerFormat};

const BASE: u64 = 0x1_0000_0000;
const FORMATS: [PointerFormat; 12] = [
    PointerFormat::Arm64e,
    PointerFormat::Ptr64,
    PointerFormat::Ptr32,
    PointerFormat::Ptr32Cache,
    PointerFormat::Ptr32Firmware,
    PointerFormat::Ptr64Offset,
    PointerFormat::Arm64eKernel,
    PointerFormat::Ptr64KernelCache,
    PointerFormat::Arm64eUserland,
    PointerFormat::Arm64eFirmware,
    PointerFormat::X86_64KernelCache,
    PointerFormat::Arm64eUserland24,
];

#[derive(Debug, Arbitrary)]
struct FuzzedChains {
    format: u8,
    page_starts: Vec<u16>,
    imports: Vec<(String, u8, bool)>,
    /// Raw contents of the fixed-up segment.
    data: Vec<u8>,
    /// Replaces the generated blob when set.
    raw_blob: Option<Vec<u8>>,
}

fuzz_target!(|data: &[u8]| {
    let Ok(fuzzed) = FuzzedChains::arbitrary(&mut Unstructured::new(data)) else {
        return;
    };

    let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_ARM64);
    b.add_segment("__TEXT", BASE, 0x4000, 0, 0x4000, VM_PROT_READ);
    b.add_segment("__DATA", BASE + 0x4000, 0x8000, 0x4000, 0x8000, VM_PROT_READ | VM_PROT_WRITE);
    b.add_segment("__LINKEDIT", BASE + 0xC000, 0x4000, 0xC000, 0x4000, VM_PROT_READ);

    let len = fuzzed.data.len().min(0x8000);
    b.write_bytes(0x4000, &fuzzed.data[..len]);

    let blob = match &fuzzed.raw_blob {
        Some(raw) => raw[..raw.len().min(0x4000)].to_vec(),
        None => {
            let format = FORMATS[fuzzed.format as usize % FORMATS.len()];
            let mut fixups = ChainedFixupsBuilder::new(format, 3);
            for (name, ordinal, weak) in fuzzed.imports.iter().take(16) {
                fixups.import(name, *ordinal, *weak);
            }
            let starts: Vec<u16> = fuzzed.page_starts.iter().copied().take(4).collect();
            fixups.segment(1, 0x4000, &starts);
            fixups.build()
        }
    };
    b.add_chained_fixups(0xC000, &blob);

    let bytes = b.build();
    let Ok(macho) = MachO::parse(&bytes) else {
        return;
    };

    let resolver = macho.resolver();
    if let Some(chains) = macho.chained_fixups() {
        for fixup in chains.fixups() {
            let plain = resolver.resolve_at(fixup.file_offset);
            let slid = resolver.resolve_at_with_adjustment(fixup.file_offset, 0x10_0000);
            // Sliding moves rebases and leaves binds alone
            if let (Ok(plain), Ok(slid)) = (plain, slid) {
                match plain.address() {
                    Some(addr) => assert_eq!(slid.address(), Some(addr.wrapping_add(0x10_0000))),
                    None => assert_eq!(slid, plain),
                }
            }
        }
    }
    for offset in (0x4000..0xC000).step_by(8) {
        let _ = resolver.resolve_at(offset);
    }
});
