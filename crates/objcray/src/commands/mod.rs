//! Command handlers for the objcray CLI.
//!
//! Each submodule handles one group of commands and prints either a text
//! listing or pretty JSON, depending on [`Output`].

pub mod decode;
pub mod fixups;
pub mod info;
pub mod records;

pub use decode::{decode, DecodeMode};
pub use fixups::fixups;
pub use info::info;
pub use records::{categories, classes, protocols, warnings};

use anyhow::{Context, Result};
use serde::Serialize;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
