//! Architecture identification and byte-order properties.

use crate::macho::{
    CPU_SUBTYPE_ARM64E, CPU_SUBTYPE_ARM_V7, CPU_SUBTYPE_ARM_V7S, CPU_SUBTYPE_MASK,
    CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32, CPU_TYPE_POWERPC, CPU_TYPE_POWERPC64,
    CPU_TYPE_X86, CPU_TYPE_X86_64,
};

/// CPU architectures a Mach-O slice can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Architecture {
    /// x86-64 / AMD64
    X86_64,
    /// 32-bit x86
    X86,
    /// ARM 64-bit (AArch64)
    Arm64,
    /// ARM 64-bit with pointer authentication
    Arm64e,
    /// ARM 64-bit instructions with 32-bit pointers (watchOS)
    Arm64_32,
    /// ARM 32-bit
    Arm,
    /// 32-bit PowerPC
    PowerPc,
    /// 64-bit PowerPC
    PowerPc64,
    /// Unknown architecture (raw cputype)
    Unknown(u32),
}

impl Architecture {
    /// Classifies a Mach-O `cputype`/`cpusubtype` pair.
    pub fn from_cpu(cputype: u32, cpusubtype: u32) -> Self {
        match cputype {
            CPU_TYPE_X86_64 => Self::X86_64,
            CPU_TYPE_X86 => Self::X86,
            CPU_TYPE_ARM64 if cpusubtype & !CPU_SUBTYPE_MASK == CPU_SUBTYPE_ARM64E => Self::Arm64e,
            CPU_TYPE_ARM64 => Self::Arm64,
            CPU_TYPE_ARM64_32 => Self::Arm64_32,
            CPU_TYPE_ARM => Self::Arm,
            CPU_TYPE_POWERPC => Self::PowerPc,
            CPU_TYPE_POWERPC64 => Self::PowerPc64,
            other => Self::Unknown(other),
        }
    }

    /// Returns the pointer size in bytes for this architecture.
    pub fn pointer_size(&self) -> usize {
        match self {
            Self::X86_64 | Self::Arm64 | Self::Arm64e | Self::PowerPc64 => 8,
            Self::X86 | Self::Arm | Self::Arm64_32 | Self::PowerPc => 4,
            Self::Unknown(_) => 8,
        }
    }

    /// Returns whether pointers are 64 bits wide.
    pub fn is_64bit(&self) -> bool {
        self.pointer_size() == 8
    }

    /// Returns the conventional name of this architecture.
    pub fn name(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::X86 => "i386",
            Self::Arm64 => "arm64",
            Self::Arm64e => "arm64e",
            Self::Arm64_32 => "arm64_32",
            Self::Arm => "arm",
            Self::PowerPc => "ppc",
            Self::PowerPc64 => "ppc64",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Selects one slice out of a fat/universal container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchSelector {
    /// Required `cputype`.
    pub cputype: u32,
    /// Required `cpusubtype` (capability bits masked off), if any.
    pub cpusubtype: Option<u32>,
}

impl ArchSelector {
    /// Creates a selector that matches any subtype of `cputype`.
    pub fn new(cputype: u32) -> Self {
        Self {
            cputype,
            cpusubtype: None,
        }
    }

    /// Creates a selector that matches an exact `cputype`/`cpusubtype` pair.
    pub fn with_subtype(cputype: u32, cpusubtype: u32) -> Self {
        Self {
            cputype,
            cpusubtype: Some(cpusubtype),
        }
    }

    /// Parses a conventional architecture name such as `arm64` or `x86_64`.
    pub fn from_name(name: &str) -> Option<Self> {
        let selector = match name {
            "x86_64" => Self::new(CPU_TYPE_X86_64),
            "i386" | "x86" => Self::new(CPU_TYPE_X86),
            "arm64" => Self::with_subtype(CPU_TYPE_ARM64, 0),
            "arm64e" => Self::with_subtype(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E),
            "arm64_32" => Self::new(CPU_TYPE_ARM64_32),
            "arm" => Self::new(CPU_TYPE_ARM),
            "armv7" => Self::with_subtype(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7),
            "armv7s" => Self::with_subtype(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7S),
            "ppc" => Self::new(CPU_TYPE_POWERPC),
            "ppc64" => Self::new(CPU_TYPE_POWERPC64),
            _ => return None,
        };
        Some(selector)
    }

    /// Returns true if the given `cputype`/`cpusubtype` pair matches.
    pub fn matches(&self, cputype: u32, cpusubtype: u32) -> bool {
        if cputype != self.cputype {
            return false;
        }
        match self.cpusubtype {
            Some(sub) => cpusubtype & !CPU_SUBTYPE_MASK == sub,
            None => true,
        }
    }
}

/// Pointer width of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    /// Size of a pointer in bytes.
    pub fn pointer_size(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}

/// Byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    Little,
    Big,
}
