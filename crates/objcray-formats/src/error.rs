//! Error types for Mach-O parsing and pointer resolution.

use thiserror::Error;

/// Error type for Mach-O parsing and pointer resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid magic number at start of file.
    #[error("invalid magic number: expected {expected}, got {actual:02x?}")]
    InvalidMagic {
        expected: &'static str,
        actual: Vec<u8>,
    },

    /// File is too short to contain required data.
    #[error("file too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// A read ran past the end of the image.
    #[error("read of {len} bytes at offset {offset:#x} is out of bounds (image size {size:#x})")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    /// The load-command table is inconsistent with the header.
    #[error("malformed load command #{index} at offset {offset:#x}: {reason}")]
    MalformedLoadCommands {
        index: u32,
        offset: u64,
        reason: String,
    },

    /// A virtual address is not covered by any segment.
    #[error("address {0:#x} is not mapped by any segment")]
    AddressNotMapped(u64),

    /// A fixup chain did not terminate within its step bound.
    #[error("fixup chain in segment {segment} page {page} loops at offset {offset:#x}")]
    FixupChainCycle { segment: u32, page: u32, offset: u64 },

    /// A resolved pointer leads outside any mapped segment.
    #[error("dangling reference to {0:#x}")]
    DanglingReference(u64),

    /// Unknown chained-fixup pointer format.
    #[error("unsupported chained pointer format {0}")]
    UnsupportedPointerFormat(u16),

    /// No slice in a fat binary matches the requested architecture.
    #[error("no architecture matching cputype {cputype:#x} in fat binary")]
    ArchitectureNotFound { cputype: u32 },

    /// Invalid value encountered during parsing.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// Unsupported format version.
    #[error("unsupported {format} version: {version}")]
    UnsupportedVersion { format: &'static str, version: u32 },

    /// Invalid section or segment.
    #[error("invalid {kind} at offset {offset:#x}: {reason}")]
    InvalidStructure {
        kind: &'static str,
        offset: u64,
        reason: String,
    },

    /// Integer overflow during parsing.
    #[error("integer overflow while parsing {context}")]
    Overflow { context: &'static str },
}

impl ParseError {
    /// Creates a new InvalidMagic error.
    pub fn invalid_magic(expected: &'static str, actual: &[u8]) -> Self {
        Self::InvalidMagic {
            expected,
            actual: actual.to_vec(),
        }
    }

    /// Creates a new TooShort error.
    pub fn too_short(expected: usize, actual: usize) -> Self {
        Self::TooShort { expected, actual }
    }

    /// Creates a new InvalidStructure error.
    pub fn invalid_structure(kind: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        Self::InvalidStructure {
            kind,
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a new MalformedLoadCommands error.
    pub fn malformed_command(index: u32, offset: u64, reason: impl Into<String>) -> Self {
        Self::MalformedLoadCommands {
            index,
            offset,
            reason: reason.into(),
        }
    }

    /// Returns true if this error should abort the whole slice.
    pub fn is_fatal_for_slice(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. } | Self::TooShort { .. } | Self::MalformedLoadCommands { .. }
        )
    }
}
