//! Extracted runtime records.
//!
//! Everything here is plain data built once per extraction pass. Pointers
//! have already been resolved; addresses include the requested slide.

use objcray_formats::{Architecture, Bitness, Endianness};
use objcray_types::{MethodSignature, ObjcType, PropertyAttributes};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::image_info::ImageInfo;
use crate::warning::ExtractionWarning;

/// Where a class pointer (superclass, category target) leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassReference {
    /// Null pointer: a root class, or an unset category target.
    None,
    /// A class defined in this image.
    Local { name: String, address: u64 },
    /// A class bound from another image.
    External {
        name: String,
        library: Option<String>,
    },
    /// The pointer resolved to an address no segment maps.
    Dangling { address: u64 },
}

impl ClassReference {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Local { name, .. } | Self::External { name, .. } => Some(name),
            Self::None | Self::Dangling { .. } => None,
        }
    }

    pub fn is_dangling(&self) -> bool {
        matches!(self, Self::Dangling { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjcMethod {
    /// Selector name.
    pub name: String,
    pub type_encoding: String,
    /// Extended encoding from a protocol's extended method types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_type_encoding: Option<String>,
    /// Decoded signature; `None` if decoding was disabled or failed.
    pub signature: Option<MethodSignature>,
    pub implementation: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjcIvar {
    pub name: String,
    pub type_encoding: String,
    #[serde(rename = "type")]
    pub ty: Option<ObjcType>,
    /// Byte offset within the instance; `None` when the offset slot is missing.
    pub offset: Option<u32>,
    pub size: u32,
    /// log2 of the alignment.
    pub alignment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjcProperty {
    pub name: String,
    pub attributes: String,
    pub decoded: Option<PropertyAttributes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjcClass {
    pub name: String,
    pub address: u64,
    pub superclass: ClassReference,
    /// `class_ro_t` flags.
    pub flags: u32,
    pub is_root: bool,
    pub is_swift: bool,
    pub instance_start: u32,
    pub instance_size: u32,
    pub ivars: Vec<ObjcIvar>,
    pub instance_methods: Vec<ObjcMethod>,
    pub class_methods: Vec<ObjcMethod>,
    pub protocols: Vec<String>,
    pub properties: Vec<ObjcProperty>,
    pub class_properties: Vec<ObjcProperty>,
    /// Set when some pointer of the record could not be followed.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjcCategory {
    pub name: String,
    pub address: u64,
    pub class: ClassReference,
    pub instance_methods: Vec<ObjcMethod>,
    pub class_methods: Vec<ObjcMethod>,
    pub protocols: Vec<String>,
    pub properties: Vec<ObjcProperty>,
    pub class_properties: Vec<ObjcProperty>,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjcProtocol {
    pub name: String,
    pub address: u64,
    pub protocols: Vec<String>,
    pub instance_methods: Vec<ObjcMethod>,
    pub class_methods: Vec<ObjcMethod>,
    pub optional_instance_methods: Vec<ObjcMethod>,
    pub optional_class_methods: Vec<ObjcMethod>,
    pub properties: Vec<ObjcProperty>,
    pub class_properties: Vec<ObjcProperty>,
    pub partial: bool,
}

/// Per-binary facts independent of individual records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BinaryFlags {
    pub contains_objc_data: bool,
    pub has_encrypted_region: bool,
    pub bitness: Bitness,
    pub endianness: Endianness,
    pub architecture: Architecture,
}

/// Output of one extraction pass.
#[derive(Debug, Clone, Serialize)]
pub struct ObjcMetadata {
    pub flags: BinaryFlags,
    pub image_info: Option<ImageInfo>,
    pub classes: Vec<ObjcClass>,
    pub categories: Vec<ObjcCategory>,
    pub protocols: Vec<ObjcProtocol>,
    pub warnings: Vec<ExtractionWarning>,
    pub cache: CacheStats,
}

impl ObjcMetadata {
    pub fn class_by_name(&self, name: &str) -> Option<&ObjcClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn protocol_by_name(&self, name: &str) -> Option<&ObjcProtocol> {
        self.protocols.iter().find(|p| p.name == name)
    }

    /// Type-string cache counters for this pass.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
    }
}
