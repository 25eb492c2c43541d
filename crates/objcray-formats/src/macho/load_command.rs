//! Mach-O load command parsing.
//!
//! Known commands decode into a closed set of variants. Anything else is kept
//! as [`LoadCommand::Unrecognized`] with its raw bytes.

use super::segment::Segment;
use crate::{ByteReader, ParseError};

pub const LC_REQ_DYLD: u32 = 0x8000_0000;

// Load command types
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_DYSYMTAB: u32 = 0xB;
pub const LC_LOAD_DYLIB: u32 = 0xC;
pub const LC_ID_DYLIB: u32 = 0xD;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_UUID: u32 = 0x1B;
pub const LC_RPATH: u32 = 0x1C | LC_REQ_DYLD;
pub const LC_CODE_SIGNATURE: u32 = 0x1D;
pub const LC_REEXPORT_DYLIB: u32 = 0x1F | LC_REQ_DYLD;
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_SOURCE_VERSION: u32 = 0x2A;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_BUILD_VERSION: u32 = 0x32;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

/// How a dylib command links its library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DylibKind {
    Load,
    Weak,
    Reexport,
    Lazy,
    Upward,
}

/// A dylib reference from a dylib load command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dylib {
    /// Install name.
    pub name: String,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

/// A `linkedit_data_command` payload: a byte range in `__LINKEDIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkeditData {
    pub dataoff: u32,
    pub datasize: u32,
}

/// Byte ranges of the compressed dyld info opcode streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DyldInfo {
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

/// An encrypted file range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncryptionInfo {
    pub cryptoff: u32,
    pub cryptsize: u32,
    /// Non-zero when the range is still encrypted.
    pub cryptid: u32,
}

impl EncryptionInfo {
    /// Returns true if the range is encrypted on disk.
    pub fn is_encrypted(&self) -> bool {
        self.cryptid != 0 && self.cryptsize != 0
    }

    /// Returns true if the file offset lies in the encrypted range.
    pub fn covers(&self, offset: u64) -> bool {
        self.is_encrypted()
            && offset >= self.cryptoff as u64
            && offset - (self.cryptoff as u64) < self.cryptsize as u64
    }
}

/// A parsed load command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadCommand {
    /// LC_SEGMENT (32-bit)
    Segment(Segment),
    /// LC_SEGMENT_64
    Segment64(Segment),
    /// LC_SYMTAB
    Symtab {
        symoff: u32,
        nsyms: u32,
        stroff: u32,
        strsize: u32,
    },
    /// LC_DYSYMTAB
    Dysymtab {
        ilocalsym: u32,
        nlocalsym: u32,
        iextdefsym: u32,
        nextdefsym: u32,
        iundefsym: u32,
        nundefsym: u32,
    },
    /// LC_LOAD_DYLIB and its weak/reexport/lazy/upward siblings
    LoadDylib { kind: DylibKind, dylib: Dylib },
    /// LC_ID_DYLIB
    IdDylib(Dylib),
    /// LC_RPATH
    Rpath(String),
    /// LC_UUID
    Uuid([u8; 16]),
    /// LC_BUILD_VERSION
    BuildVersion { platform: u32, minos: u32, sdk: u32 },
    /// LC_VERSION_MIN_*
    VersionMin { cmd: u32, version: u32, sdk: u32 },
    /// LC_SOURCE_VERSION
    SourceVersion(u64),
    /// LC_MAIN
    Main { entryoff: u64, stacksize: u64 },
    /// LC_ENCRYPTION_INFO / LC_ENCRYPTION_INFO_64
    EncryptionInfo { is_64: bool, info: EncryptionInfo },
    /// LC_DYLD_INFO / LC_DYLD_INFO_ONLY
    DyldInfo { only: bool, info: DyldInfo },
    /// LC_DYLD_CHAINED_FIXUPS
    ChainedFixups(LinkeditData),
    /// LC_DYLD_EXPORTS_TRIE
    ExportsTrie(LinkeditData),
    /// LC_FUNCTION_STARTS
    FunctionStarts(LinkeditData),
    /// LC_CODE_SIGNATURE
    CodeSignature(LinkeditData),
    /// Any command this parser does not model, kept verbatim.
    Unrecognized { cmd: u32, data: Vec<u8> },
}

impl LoadCommand {
    /// Parse a load command. `cmd` is a reader over exactly `cmdsize` bytes.
    pub fn parse(cmd: &ByteReader<'_>) -> Result<Self, ParseError> {
        if cmd.len() < 8 {
            return Err(ParseError::too_short(8, cmd.len()));
        }

        let kind = cmd.read_u32(0)?;

        let command = match kind {
            LC_SEGMENT => Self::Segment(Segment::parse_32(cmd)?),
            LC_SEGMENT_64 => Self::Segment64(Segment::parse_64(cmd)?),
            LC_SYMTAB => Self::Symtab {
                symoff: cmd.read_u32(8)?,
                nsyms: cmd.read_u32(12)?,
                stroff: cmd.read_u32(16)?,
                strsize: cmd.read_u32(20)?,
            },
            LC_DYSYMTAB => Self::Dysymtab {
                ilocalsym: cmd.read_u32(8)?,
                nlocalsym: cmd.read_u32(12)?,
                iextdefsym: cmd.read_u32(16)?,
                nextdefsym: cmd.read_u32(20)?,
                iundefsym: cmd.read_u32(24)?,
                nundefsym: cmd.read_u32(28)?,
            },
            LC_LOAD_DYLIB => Self::load_dylib(cmd, DylibKind::Load)?,
            LC_LOAD_WEAK_DYLIB => Self::load_dylib(cmd, DylibKind::Weak)?,
            LC_REEXPORT_DYLIB => Self::load_dylib(cmd, DylibKind::Reexport)?,
            LC_LAZY_LOAD_DYLIB => Self::load_dylib(cmd, DylibKind::Lazy)?,
            LC_LOAD_UPWARD_DYLIB => Self::load_dylib(cmd, DylibKind::Upward)?,
            LC_ID_DYLIB => Self::IdDylib(parse_dylib(cmd)?),
            LC_RPATH => Self::Rpath(parse_lc_str(cmd, 8)?),
            LC_UUID => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(cmd.read_bytes(8, 16)?);
                Self::Uuid(uuid)
            }
            LC_BUILD_VERSION => Self::BuildVersion {
                platform: cmd.read_u32(8)?,
                minos: cmd.read_u32(12)?,
                sdk: cmd.read_u32(16)?,
            },
            LC_VERSION_MIN_MACOSX
            | LC_VERSION_MIN_IPHONEOS
            | LC_VERSION_MIN_TVOS
            | LC_VERSION_MIN_WATCHOS => Self::VersionMin {
                cmd: kind,
                version: cmd.read_u32(8)?,
                sdk: cmd.read_u32(12)?,
            },
            LC_SOURCE_VERSION => Self::SourceVersion(cmd.read_u64(8)?),
            LC_MAIN => Self::Main {
                entryoff: cmd.read_u64(8)?,
                stacksize: cmd.read_u64(16)?,
            },
            LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => Self::EncryptionInfo {
                is_64: kind == LC_ENCRYPTION_INFO_64,
                info: EncryptionInfo {
                    cryptoff: cmd.read_u32(8)?,
                    cryptsize: cmd.read_u32(12)?,
                    cryptid: cmd.read_u32(16)?,
                },
            },
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => Self::DyldInfo {
                only: kind == LC_DYLD_INFO_ONLY,
                info: DyldInfo {
                    rebase_off: cmd.read_u32(8)?,
                    rebase_size: cmd.read_u32(12)?,
                    bind_off: cmd.read_u32(16)?,
                    bind_size: cmd.read_u32(20)?,
                    weak_bind_off: cmd.read_u32(24)?,
                    weak_bind_size: cmd.read_u32(28)?,
                    lazy_bind_off: cmd.read_u32(32)?,
                    lazy_bind_size: cmd.read_u32(36)?,
                    export_off: cmd.read_u32(40)?,
                    export_size: cmd.read_u32(44)?,
                },
            },
            LC_DYLD_CHAINED_FIXUPS => Self::ChainedFixups(parse_linkedit(cmd)?),
            LC_DYLD_EXPORTS_TRIE => Self::ExportsTrie(parse_linkedit(cmd)?),
            LC_FUNCTION_STARTS => Self::FunctionStarts(parse_linkedit(cmd)?),
            LC_CODE_SIGNATURE => Self::CodeSignature(parse_linkedit(cmd)?),
            _ => Self::Unrecognized {
                cmd: kind,
                data: cmd.data().to_vec(),
            },
        };

        Ok(command)
    }

    fn load_dylib(cmd: &ByteReader<'_>, kind: DylibKind) -> Result<Self, ParseError> {
        Ok(Self::LoadDylib {
            kind,
            dylib: parse_dylib(cmd)?,
        })
    }

    /// Returns the command type.
    pub fn cmd_type(&self) -> u32 {
        match self {
            Self::Segment(_) => LC_SEGMENT,
            Self::Segment64(_) => LC_SEGMENT_64,
            Self::Symtab { .. } => LC_SYMTAB,
            Self::Dysymtab { .. } => LC_DYSYMTAB,
            Self::LoadDylib { kind, .. } => match kind {
                DylibKind::Load => LC_LOAD_DYLIB,
                DylibKind::Weak => LC_LOAD_WEAK_DYLIB,
                DylibKind::Reexport => LC_REEXPORT_DYLIB,
                DylibKind::Lazy => LC_LAZY_LOAD_DYLIB,
                DylibKind::Upward => LC_LOAD_UPWARD_DYLIB,
            },
            Self::IdDylib(_) => LC_ID_DYLIB,
            Self::Rpath(_) => LC_RPATH,
            Self::Uuid(_) => LC_UUID,
            Self::BuildVersion { .. } => LC_BUILD_VERSION,
            Self::VersionMin { cmd, .. } => *cmd,
            Self::SourceVersion(_) => LC_SOURCE_VERSION,
            Self::Main { .. } => LC_MAIN,
            Self::EncryptionInfo { is_64: true, .. } => LC_ENCRYPTION_INFO_64,
            Self::EncryptionInfo { is_64: false, .. } => LC_ENCRYPTION_INFO,
            Self::DyldInfo { only: true, .. } => LC_DYLD_INFO_ONLY,
            Self::DyldInfo { only: false, .. } => LC_DYLD_INFO,
            Self::ChainedFixups(_) => LC_DYLD_CHAINED_FIXUPS,
            Self::ExportsTrie(_) => LC_DYLD_EXPORTS_TRIE,
            Self::FunctionStarts(_) => LC_FUNCTION_STARTS,
            Self::CodeSignature(_) => LC_CODE_SIGNATURE,
            Self::Unrecognized { cmd, .. } => *cmd,
        }
    }

    /// Returns a human-readable name for this command type.
    pub fn name(&self) -> &'static str {
        match self.cmd_type() {
            LC_SEGMENT => "LC_SEGMENT",
            LC_SEGMENT_64 => "LC_SEGMENT_64",
            LC_SYMTAB => "LC_SYMTAB",
            LC_DYSYMTAB => "LC_DYSYMTAB",
            LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
            LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
            LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
            LC_LAZY_LOAD_DYLIB => "LC_LAZY_LOAD_DYLIB",
            LC_LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
            LC_ID_DYLIB => "LC_ID_DYLIB",
            LC_RPATH => "LC_RPATH",
            LC_UUID => "LC_UUID",
            LC_BUILD_VERSION => "LC_BUILD_VERSION",
            LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
            LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
            LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
            LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
            LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
            LC_MAIN => "LC_MAIN",
            LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
            LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
            LC_DYLD_INFO => "LC_DYLD_INFO",
            LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
            LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
            LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
            LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
            LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
            _ => "LC_UNRECOGNIZED",
        }
    }
}

fn parse_linkedit(cmd: &ByteReader<'_>) -> Result<LinkeditData, ParseError> {
    Ok(LinkeditData {
        dataoff: cmd.read_u32(8)?,
        datasize: cmd.read_u32(12)?,
    })
}

fn parse_dylib(cmd: &ByteReader<'_>) -> Result<Dylib, ParseError> {
    Ok(Dylib {
        name: parse_lc_str(cmd, 8)?,
        timestamp: cmd.read_u32(12)?,
        current_version: cmd.read_u32(16)?,
        compatibility_version: cmd.read_u32(20)?,
    })
}

/// Reads an `lc_str`: a u32 offset at `at`, relative to the command start.
fn parse_lc_str(cmd: &ByteReader<'_>, at: u64) -> Result<String, ParseError> {
    let name_offset = cmd.read_u32(at)? as u64;
    if name_offset >= cmd.len() as u64 {
        return Err(ParseError::invalid_structure(
            "lc_str",
            name_offset,
            "string offset past end of command",
        ));
    }
    let name_bytes = cmd.read_bytes(name_offset, cmd.len() as u64 - name_offset)?;
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
    Ok(String::from_utf8_lossy(&name_bytes[..end]).to_string())
}

/// Formats a packed `xxxx.yy.zz` version number.
pub fn format_version(version: u32) -> String {
    format!("{}.{}.{}", version >> 16, (version >> 8) & 0xFF, version & 0xFF)
}
