//! Field offsets of the runtime structures for 32- and 64-bit images.
//!
//! The structures are pointer-sized almost everywhere, so offsets are
//! expressed in pointer units plus the few fixed 32-bit fields.

use objcray_formats::Bitness;

/// `class_ro_t` flags.
pub const RO_META: u32 = 1 << 0;
pub const RO_ROOT: u32 = 1 << 1;
pub const RO_HAS_CXX_STRUCTORS: u32 = 1 << 2;
pub const RO_HIDDEN: u32 = 1 << 4;
pub const RO_EXCEPTION: u32 = 1 << 5;
pub const RO_IS_ARC: u32 = 1 << 7;

/// Method list header flags.
pub const METHOD_LIST_RELATIVE_FLAG: u32 = 0x8000_0000;
pub const METHOD_LIST_SELECTORS_DIRECT_FLAG: u32 = 0x4000_0000;
pub const METHOD_LIST_FLAGS_MASK: u32 = 0xFFFF_0003;

/// Size of a relative method entry (three `int32_t` offsets).
pub const RELATIVE_METHOD_SIZE: u64 = 12;

const FAST_DATA_MASK_64: u64 = 0x0000_7FFF_FFFF_FFF8;
const FAST_DATA_MASK_32: u64 = 0xFFFF_FFFC;
const FAST_IS_SWIFT_LEGACY: u64 = 1 << 0;
const FAST_IS_SWIFT_STABLE: u64 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    bitness: Bitness,
    ptr: u64,
}

impl Layout {
    pub fn new(bitness: Bitness) -> Self {
        Self {
            bitness,
            ptr: bitness.pointer_size() as u64,
        }
    }

    pub fn pointer_size(&self) -> u64 {
        self.ptr
    }

    /// Strips tag bits from a rebased target.
    pub fn strip_pointer(&self, value: u64) -> u64 {
        match self.bitness {
            Bitness::Bits64 => value & 0x00FF_FFFF_FFFF_FFFF,
            Bitness::Bits32 => value & 0xFFFF_FFFF,
        }
    }

    // class_t: isa, superclass, cache, vtable, data
    pub fn class_isa(&self) -> u64 {
        0
    }

    pub fn class_superclass(&self) -> u64 {
        self.ptr
    }

    pub fn class_data(&self) -> u64 {
        4 * self.ptr
    }

    /// Splits the `data` word into the `class_ro_t` address and the Swift bit.
    pub fn class_data_bits(&self, bits: u64) -> (u64, bool) {
        match self.bitness {
            Bitness::Bits64 => (
                bits & FAST_DATA_MASK_64,
                bits & (FAST_IS_SWIFT_LEGACY | FAST_IS_SWIFT_STABLE) != 0,
            ),
            Bitness::Bits32 => (bits & FAST_DATA_MASK_32, bits & FAST_IS_SWIFT_LEGACY != 0),
        }
    }

    // class_ro_t: flags, instanceStart, instanceSize, [reserved], ivarLayout,
    // name, baseMethods, baseProtocols, ivars, weakIvarLayout, baseProperties
    pub fn ro_flags(&self) -> u64 {
        0
    }

    pub fn ro_instance_start(&self) -> u64 {
        4
    }

    pub fn ro_instance_size(&self) -> u64 {
        8
    }

    fn ro_pointers(&self) -> u64 {
        match self.bitness {
            Bitness::Bits64 => 16,
            Bitness::Bits32 => 12,
        }
    }

    pub fn ro_name(&self) -> u64 {
        self.ro_pointers() + self.ptr
    }

    pub fn ro_methods(&self) -> u64 {
        self.ro_pointers() + 2 * self.ptr
    }

    pub fn ro_protocols(&self) -> u64 {
        self.ro_pointers() + 3 * self.ptr
    }

    pub fn ro_ivars(&self) -> u64 {
        self.ro_pointers() + 4 * self.ptr
    }

    pub fn ro_properties(&self) -> u64 {
        self.ro_pointers() + 6 * self.ptr
    }

    /// Pointer-based `method_t`: name, types, imp.
    pub fn method_size(&self) -> u64 {
        3 * self.ptr
    }

    /// `ivar_t`: offset pointer, name, type, alignment, size.
    pub fn ivar_size(&self) -> u64 {
        3 * self.ptr + 8
    }

    /// `property_t`: name, attributes.
    pub fn property_size(&self) -> u64 {
        2 * self.ptr
    }

    // protocol_t
    pub fn protocol_name(&self) -> u64 {
        self.ptr
    }

    pub fn protocol_protocols(&self) -> u64 {
        2 * self.ptr
    }

    pub fn protocol_instance_methods(&self) -> u64 {
        3 * self.ptr
    }

    pub fn protocol_class_methods(&self) -> u64 {
        4 * self.ptr
    }

    pub fn protocol_optional_instance_methods(&self) -> u64 {
        5 * self.ptr
    }

    pub fn protocol_optional_class_methods(&self) -> u64 {
        6 * self.ptr
    }

    pub fn protocol_properties(&self) -> u64 {
        7 * self.ptr
    }

    pub fn protocol_size(&self) -> u64 {
        8 * self.ptr
    }

    pub fn protocol_extended_method_types(&self) -> u64 {
        8 * self.ptr + 8
    }

    pub fn protocol_class_properties(&self) -> u64 {
        10 * self.ptr + 8
    }

    // category_t
    pub fn category_name(&self) -> u64 {
        0
    }

    pub fn category_class(&self) -> u64 {
        self.ptr
    }

    pub fn category_instance_methods(&self) -> u64 {
        2 * self.ptr
    }

    pub fn category_class_methods(&self) -> u64 {
        3 * self.ptr
    }

    pub fn category_protocols(&self) -> u64 {
        4 * self.ptr
    }

    pub fn category_properties(&self) -> u64 {
        5 * self.ptr
    }

    pub fn category_class_properties(&self) -> u64 {
        6 * self.ptr
    }
}
