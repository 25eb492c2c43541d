//! Image-level extraction errors.

use objcray_formats::ParseError;
use thiserror::Error;

/// Failures that abort extraction of a whole slice.
///
/// Anything narrower than the slice is reported as an
/// [`ExtractionWarning`](crate::ExtractionWarning) instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to parse Mach-O: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
