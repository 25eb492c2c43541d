#![no_main]

use libfuzzer_sys::fuzz_target;
use objcray_formats::macho::MachO;
use objcray_objc::{extract, ExtractOptions};

fuzz_target!(|data: &[u8]| {
    // Parse errors are expected for malformed input; panics are not
    let _ = MachO::fat_architectures(data);

    if let Ok(macho) = MachO::parse(data) {
        let _ = macho.architecture();
        let _ = macho.preferred_load_address();
        let _ = macho.dylib_names();
        let _ = macho.uuid();

        for section in macho.sections() {
            let _ = macho.section_data(section).map(|d| d.len());
            let _ = macho.cstring_at(section.addr);
        }
        for seg in &macho.segments {
            let _ = macho.vm_to_file(seg.vmaddr);
            let _ = macho.resolver().resolve_at(seg.fileoff);
        }

        let metadata = extract(&macho, ExtractOptions::default());
        for class in &metadata.classes {
            let _ = class.name.len();
        }
    }
});
