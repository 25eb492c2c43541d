//! Record-level diagnostics.

use std::fmt;

use objcray_formats::ParseError;
use serde::Serialize;

/// What went wrong with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A pointer resolved to an address no segment maps.
    DanglingReference,
    /// A type encoding could not be decoded.
    TypeSyntax,
    /// A read ran past the image or segment bounds.
    OutOfBounds,
    /// The record lies in an encrypted range and was skipped.
    EncryptedRegion,
    /// A pointer slot held a symbol bind where an address was expected.
    UnexpectedBind,
    /// A list header or field held an impossible value.
    MalformedRecord,
    /// The chained fixups table was dropped; pointers are read raw.
    FixupTable,
}

/// A non-fatal problem found while extracting metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionWarning {
    pub kind: WarningKind,
    /// VM address of the record or field involved.
    pub address: u64,
    pub message: String,
}

impl ExtractionWarning {
    pub fn new(kind: WarningKind, address: u64, message: impl Into<String>) -> Self {
        Self {
            kind,
            address,
            message: message.into(),
        }
    }

    /// Classifies a read failure at `address`.
    pub fn from_parse_error(address: u64, context: &str, err: &ParseError) -> Self {
        let kind = match err {
            ParseError::AddressNotMapped(_) | ParseError::DanglingReference(_) => {
                WarningKind::DanglingReference
            }
            ParseError::OutOfBounds { .. } => WarningKind::OutOfBounds,
            ParseError::FixupChainCycle { .. } | ParseError::UnsupportedPointerFormat(_) => {
                WarningKind::FixupTable
            }
            _ => WarningKind::MalformedRecord,
        };
        Self::new(kind, address, format!("{}: {}", context, err))
    }
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.message)
    }
}
