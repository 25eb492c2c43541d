//! Mach-O and fat (universal) header parsing.

use crate::{Architecture, Bitness, ByteReader, Endianness, ParseError};

// Magic numbers, as read in host order from the first four bytes
pub const MH_MAGIC: u32 = 0xFEEDFACE;
pub const MH_CIGAM: u32 = 0xCEFAEDFE;
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;
pub const FAT_MAGIC: u32 = 0xCAFEBABE;
pub const FAT_CIGAM: u32 = 0xBEBAFECA;
pub const FAT_MAGIC_64: u32 = 0xCAFEBABF;
pub const FAT_CIGAM_64: u32 = 0xBFBAFECA;

// CPU types
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;
pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;
pub const CPU_TYPE_POWERPC: u32 = 18;
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

// CPU subtypes
pub const CPU_SUBTYPE_MASK: u32 = 0xFF00_0000;
pub const CPU_SUBTYPE_ARM_V7: u32 = 9;
pub const CPU_SUBTYPE_ARM_V7S: u32 = 11;
pub const CPU_SUBTYPE_ARM64E: u32 = 2;

// File types
pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_DYLINKER: u32 = 0x7;
pub const MH_BUNDLE: u32 = 0x8;
pub const MH_DSYM: u32 = 0xA;
pub const MH_KEXT_BUNDLE: u32 = 0xB;

/// File type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    Object,
    Execute,
    Dylib,
    Dylinker,
    Bundle,
    Dsym,
    KextBundle,
    Other(u32),
}

impl FileType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            MH_OBJECT => Self::Object,
            MH_EXECUTE => Self::Execute,
            MH_DYLIB => Self::Dylib,
            MH_DYLINKER => Self::Dylinker,
            MH_BUNDLE => Self::Bundle,
            MH_DSYM => Self::Dsym,
            MH_KEXT_BUNDLE => Self::KextBundle,
            other => Self::Other(other),
        }
    }
}

/// Determines bitness and byte order from a Mach-O magic read in little-endian order.
pub(crate) fn classify_magic(magic_le: u32) -> Option<(Bitness, Endianness)> {
    match magic_le {
        MH_MAGIC => Some((Bitness::Bits32, Endianness::Little)),
        MH_CIGAM => Some((Bitness::Bits32, Endianness::Big)),
        MH_MAGIC_64 => Some((Bitness::Bits64, Endianness::Little)),
        MH_CIGAM_64 => Some((Bitness::Bits64, Endianness::Big)),
        _ => None,
    }
}

/// Mach-O header.
#[derive(Debug, Clone)]
pub struct MachHeader {
    /// Magic number, read little-endian.
    pub magic: u32,
    /// Pointer width declared by the magic.
    pub bitness: Bitness,
    /// Byte order declared by the magic.
    pub endianness: Endianness,
    /// Raw CPU type.
    pub cputype: u32,
    /// Raw CPU subtype (including capability bits).
    pub cpusubtype: u32,
    /// File type.
    pub filetype: FileType,
    /// Number of load commands.
    pub ncmds: u32,
    /// Size of all load commands.
    pub sizeofcmds: u32,
    /// Flags.
    pub flags: u32,
}

impl MachHeader {
    /// Parse a Mach-O header from the start of a slice.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 28 {
            return Err(ParseError::too_short(28, data.len()));
        }

        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let (bitness, endianness) =
            classify_magic(magic).ok_or_else(|| ParseError::invalid_magic("Mach-O", &data[0..4]))?;

        let size = Self::size_for(bitness);
        if data.len() < size {
            return Err(ParseError::too_short(size, data.len()));
        }

        let reader = ByteReader::new(data, endianness);
        Ok(Self {
            magic,
            bitness,
            endianness,
            cputype: reader.read_u32(4)?,
            cpusubtype: reader.read_u32(8)?,
            filetype: FileType::from_u32(reader.read_u32(12)?),
            ncmds: reader.read_u32(16)?,
            sizeofcmds: reader.read_u32(20)?,
            flags: reader.read_u32(24)?,
        })
    }

    fn size_for(bitness: Bitness) -> usize {
        match bitness {
            Bitness::Bits64 => 32,
            Bitness::Bits32 => 28,
        }
    }

    /// Returns true if this is a 64-bit Mach-O.
    pub fn is_64bit(&self) -> bool {
        self.bitness == Bitness::Bits64
    }

    /// Returns the size of the header in bytes.
    pub fn header_size(&self) -> usize {
        Self::size_for(self.bitness)
    }

    /// Returns the architecture.
    pub fn architecture(&self) -> Architecture {
        Architecture::from_cpu(self.cputype, self.cpusubtype)
    }
}

/// Fat binary header.
#[derive(Debug)]
pub struct FatHeader {
    /// Architectures in the fat binary.
    pub architectures: Vec<FatArch>,
}

/// Architecture entry in a fat binary.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FatArch {
    /// CPU type.
    pub cputype: u32,
    /// CPU subtype.
    pub cpusubtype: u32,
    /// File offset to this architecture.
    pub offset: u64,
    /// Size of this architecture.
    pub size: u64,
    /// Alignment (power of 2).
    pub align: u32,
}

impl FatArch {
    /// Returns the architecture of this slice.
    pub fn architecture(&self) -> Architecture {
        Architecture::from_cpu(self.cputype, self.cpusubtype)
    }
}

/// Returns true if `data` starts with a fat magic in either byte order.
pub fn is_fat(data: &[u8]) -> bool {
    data.len() >= 4
        && matches!(
            u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            FAT_MAGIC | FAT_CIGAM | FAT_MAGIC_64 | FAT_CIGAM_64
        )
}

impl FatHeader {
    /// Parse a fat binary header.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::too_short(8, data.len()));
        }

        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let (endian, is_64) = match magic {
            FAT_MAGIC => (Endianness::Big, false),
            FAT_CIGAM => (Endianness::Little, false),
            FAT_MAGIC_64 => (Endianness::Big, true),
            FAT_CIGAM_64 => (Endianness::Little, true),
            _ => return Err(ParseError::invalid_magic("fat Mach-O", &data[0..4])),
        };

        let reader = ByteReader::new(data, endian);
        let nfat_arch = reader.read_u32(4)?;
        let entry_size: u64 = if is_64 { 32 } else { 20 };

        // Every entry must fit; a huge count is a malformed header, not an allocation
        let table_end = (nfat_arch as u64)
            .checked_mul(entry_size)
            .and_then(|n| n.checked_add(8))
            .ok_or(ParseError::Overflow { context: "fat arch table" })?;
        if table_end > data.len() as u64 {
            return Err(ParseError::too_short(table_end as usize, data.len()));
        }

        let mut architectures = Vec::with_capacity(nfat_arch as usize);
        let mut offset = 8u64;

        for _ in 0..nfat_arch {
            let arch = if is_64 {
                FatArch {
                    cputype: reader.read_u32(offset)?,
                    cpusubtype: reader.read_u32(offset + 4)?,
                    offset: reader.read_u64(offset + 8)?,
                    size: reader.read_u64(offset + 16)?,
                    align: reader.read_u32(offset + 24)?,
                }
            } else {
                FatArch {
                    cputype: reader.read_u32(offset)?,
                    cpusubtype: reader.read_u32(offset + 4)?,
                    offset: reader.read_u32(offset + 8)? as u64,
                    size: reader.read_u32(offset + 12)? as u64,
                    align: reader.read_u32(offset + 16)?,
                }
            };
            architectures.push(arch);
            offset += entry_size;
        }

        Ok(Self { architectures })
    }
}
