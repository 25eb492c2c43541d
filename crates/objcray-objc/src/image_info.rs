//! `__objc_imageinfo` decoding.

use serde::Serialize;

pub const OBJC_IMAGE_IS_REPLACEMENT: u32 = 1 << 0;
pub const OBJC_IMAGE_SUPPORTS_GC: u32 = 1 << 1;
pub const OBJC_IMAGE_REQUIRES_GC: u32 = 1 << 2;
pub const OBJC_IMAGE_OPTIMIZED_BY_DYLD: u32 = 1 << 3;
pub const OBJC_IMAGE_IS_SIMULATED: u32 = 1 << 5;
pub const OBJC_IMAGE_HAS_CATEGORY_CLASS_PROPERTIES: u32 = 1 << 6;

const SWIFT_UNSTABLE_VERSION_SHIFT: u32 = 8;
const SWIFT_STABLE_VERSION_SHIFT: u32 = 16;

/// The image info record every Objective-C image carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub version: u32,
    pub flags: u32,
}

impl ImageInfo {
    pub fn new(version: u32, flags: u32) -> Self {
        Self { version, flags }
    }

    pub fn is_simulated(&self) -> bool {
        self.flags & OBJC_IMAGE_IS_SIMULATED != 0
    }

    pub fn optimized_by_dyld(&self) -> bool {
        self.flags & OBJC_IMAGE_OPTIMIZED_BY_DYLD != 0
    }

    pub fn supports_gc(&self) -> bool {
        self.flags & (OBJC_IMAGE_SUPPORTS_GC | OBJC_IMAGE_REQUIRES_GC) != 0
    }

    /// Category records carry the trailing class-properties field.
    pub fn has_category_class_properties(&self) -> bool {
        self.flags & OBJC_IMAGE_HAS_CATEGORY_CLASS_PROPERTIES != 0
    }

    /// Pre-ABI-stability Swift version byte.
    pub fn swift_unstable_version(&self) -> u8 {
        (self.flags >> SWIFT_UNSTABLE_VERSION_SHIFT) as u8
    }

    /// Swift ABI-stable version field.
    pub fn swift_stable_version(&self) -> u16 {
        (self.flags >> SWIFT_STABLE_VERSION_SHIFT) as u16
    }

    /// Returns true if any Swift code contributed to the image.
    pub fn has_swift(&self) -> bool {
        self.swift_unstable_version() != 0 || self.swift_stable_version() != 0
    }
}
