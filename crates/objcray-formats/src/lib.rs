//! # objcray-formats
//!
//! Mach-O parsing for objcray. This crate provides:
//! - a bounds-checked [`ByteReader`] over image bytes
//! - thin and fat Mach-O parsing with segment/section queries
//! - chained fixups and legacy bind resolution of pointer slots
//!
//! Everything is read-only and borrows the input bytes.

pub mod arch;
pub mod error;
pub mod macho;
pub mod reader;

pub use arch::{ArchSelector, Architecture, Bitness, Endianness};
pub use error::ParseError;
pub use macho::{
    BindTarget, ChainedFixups, FatArch, LoadCommand, MachO, PointerFormat, PointerResolver,
    ResolvedPointer, Section, Segment,
};
pub use reader::ByteReader;

/// Detected container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryType {
    MachO,
    Fat,
    Unknown,
}

/// Detect the container kind from magic bytes.
pub fn detect_format(data: &[u8]) -> BinaryType {
    if data.len() < 4 {
        return BinaryType::Unknown;
    }

    if macho::is_fat(data) {
        return BinaryType::Fat;
    }

    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    match magic {
        macho::MH_MAGIC | macho::MH_CIGAM | macho::MH_MAGIC_64 | macho::MH_CIGAM_64 => {
            BinaryType::MachO
        }
        _ => BinaryType::Unknown,
    }
}
