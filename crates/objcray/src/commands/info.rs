//! Binary overview.

use anyhow::Result;
use objcray_formats::{Architecture, Bitness, Endianness, MachO};
use objcray_objc::{ImageInfo, ObjcMetadata};
use serde::Serialize;

use super::{print_json, Output};

#[derive(Serialize)]
struct Info<'a> {
    architecture: Architecture,
    bitness: Bitness,
    endianness: Endianness,
    slice_offset: u64,
    fat_slices: &'a [&'static str],
    preferred_load_address: u64,
    uuid: Option<String>,
    install_name: Option<&'a str>,
    dylibs: Vec<&'a str>,
    encrypted: bool,
    chained_fixups: Option<usize>,
    fixup_errors: Vec<String>,
    image_info: Option<ImageInfo>,
    classes: usize,
    categories: usize,
    protocols: usize,
    warnings: usize,
}

fn format_uuid(uuid: [u8; 16]) -> String {
    let hex: Vec<String> = uuid.iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        hex[0..4].concat(),
        hex[4..6].concat(),
        hex[6..8].concat(),
        hex[8..10].concat(),
        hex[10..16].concat()
    )
}

/// Handle the `info` command.
pub fn info(
    macho: &MachO<'_>,
    metadata: &ObjcMetadata,
    fat_slices: &[&'static str],
    output: Output,
) -> Result<()> {
    let info = Info {
        architecture: macho.architecture(),
        bitness: macho.bitness(),
        endianness: macho.endianness(),
        slice_offset: macho.slice_offset(),
        fat_slices,
        preferred_load_address: macho.preferred_load_address(),
        uuid: macho.uuid().map(format_uuid),
        install_name: macho.install_name(),
        dylibs: macho.dylib_names(),
        encrypted: macho.is_encrypted(),
        chained_fixups: macho.chained_fixups().map(|c| c.len()),
        fixup_errors: macho.fixup_errors().iter().map(ToString::to_string).collect(),
        image_info: metadata.image_info,
        classes: metadata.classes.len(),
        categories: metadata.categories.len(),
        protocols: metadata.protocols.len(),
        warnings: metadata.warnings.len(),
    };

    if output == Output::Json {
        return print_json(&info);
    }

    println!("Binary Information");
    println!("==================");
    println!("Architecture:  {}", info.architecture.name());
    println!("Bitness:       {:?}", info.bitness);
    println!("Endianness:    {:?}", info.endianness);
    println!("File Type:     {:?}", macho.header.filetype);
    if !info.fat_slices.is_empty() {
        println!("Fat Slices:    {}", info.fat_slices.join(", "));
        println!("Slice Offset:  {:#x}", info.slice_offset);
    }
    println!("Load Address:  {:#x}", info.preferred_load_address);
    if let Some(uuid) = &info.uuid {
        println!("UUID:          {}", uuid);
    }
    if let Some(name) = info.install_name {
        println!("Install Name:  {}", name);
    }
    println!("Encrypted:     {}", if info.encrypted { "yes" } else { "no" });

    match info.chained_fixups {
        Some(count) => println!("Fixups:        {} chained entries", count),
        None => println!("Fixups:        none"),
    }
    for err in &info.fixup_errors {
        println!("  ignored: {}", err);
    }

    println!("\nSegments:");
    for seg in &macho.segments {
        println!(
            "  {:<16} {:#014x}-{:#014x}  file {:#x}+{:#x}",
            seg.segname,
            seg.vmaddr,
            seg.vmaddr.wrapping_add(seg.vmsize),
            seg.fileoff,
            seg.filesize
        );
    }

    if !info.dylibs.is_empty() {
        println!("\nLinked Libraries:");
        for (i, name) in info.dylibs.iter().enumerate() {
            println!("  {:>3}  {}", i + 1, name);
        }
    }

    println!("\nObjective-C");
    println!("-----------");
    match info.image_info {
        Some(image_info) => {
            println!("Image Info:    version {} flags {:#x}", image_info.version, image_info.flags);
            if image_info.has_swift() {
                println!(
                    "Swift:         stable {} / unstable {}",
                    image_info.swift_stable_version(),
                    image_info.swift_unstable_version()
                );
            }
        }
        None => println!("Image Info:    absent"),
    }
    println!("Classes:       {}", info.classes);
    println!("Categories:    {}", info.categories);
    println!("Protocols:     {}", info.protocols);
    println!("Warnings:      {}", info.warnings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uuid() {
        let uuid = 0x1234_5678_9ABC_DEF0_0123_4567_89AB_CDEFu128.to_be_bytes();
        assert_eq!(format_uuid(uuid), "12345678-9ABC-DEF0-0123-456789ABCDEF");
    }
}
