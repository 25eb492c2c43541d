//! # objcray-objc
//!
//! Objective-C runtime metadata extraction for objcray.
//!
//! Reads the class, category and protocol lists of a parsed Mach-O slice,
//! following every pointer through the image's fixup resolver and decoding
//! the embedded type strings. Problems with individual records become
//! warnings; only slice-level parse failures are errors.
//!
//! # Example
//!
//! ```ignore
//! use objcray_objc::{extract_from_bytes, ExtractOptions};
//!
//! let data = std::fs::read("Foundation")?;
//! let metadata = extract_from_bytes(&data, None, ExtractOptions::default())?;
//! for class in &metadata.classes {
//!     println!("{} : {:?}", class.name, class.superclass.name());
//! }
//! ```

pub mod cache;
pub mod error;
pub mod extractor;
pub mod image_info;
pub mod layout;
pub mod records;
pub mod warning;

pub use cache::{CacheStats, TypeCache};
pub use error::{ExtractError, Result};
pub use extractor::{binary_flags, class_name_from_symbol, ExtractOptions, Extractor};
pub use image_info::ImageInfo;
pub use records::*;
pub use warning::{ExtractionWarning, WarningKind};

use objcray_formats::{ArchSelector, MachO};

/// Extracts all metadata from an already parsed slice.
pub fn extract(macho: &MachO<'_>, options: ExtractOptions) -> ObjcMetadata {
    Extractor::new(macho, options).extract()
}

/// Parses `data` (thin or fat) and extracts the selected slice.
pub fn extract_from_bytes(
    data: &[u8],
    selector: Option<&ArchSelector>,
    options: ExtractOptions,
) -> Result<ObjcMetadata> {
    let macho = MachO::parse_arch(data, selector)?;
    Ok(extract(&macho, options))
}
