//! objcray - Objective-C runtime metadata dumper
//!
//! Usage:
//!   objcray <binary>                   List classes
//!   objcray <binary> protocols         List protocols
//!   objcray <binary> --json classes    Dump class records as JSON
//!   objcray <binary> --arch arm64 info Show header facts for one fat slice
//!   objcray decode '{CGPoint=dd}'      Decode a type encoding

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use objcray_formats::{detect_format, ArchSelector, Architecture, BinaryType, MachO};
use objcray_objc::{ExtractOptions, ObjcMetadata};
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{DecodeMode, Output};

#[derive(Parser)]
#[command(name = "objcray", version)]
#[command(about = "Dump Objective-C runtime metadata from Mach-O binaries", long_about = None)]
struct Cli {
    /// Path to a Mach-O or fat binary
    binary: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Slice to read from a fat binary (arm64, arm64e, x86_64, armv7, i386)
    #[arg(long)]
    arch: Option<String>,

    /// Load slide added to reported addresses, in hex
    #[arg(long, value_parser = parse_hex, default_value = "0")]
    slide: u64,

    /// Keep type encodings as raw strings
    #[arg(long)]
    raw_types: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, slice and fixup information
    Info,
    /// List classes (default)
    Classes,
    /// List protocols
    Protocols,
    /// List categories
    Categories,
    /// List extraction warnings
    Warnings,
    /// List chained fixup entries with their resolved targets
    Fixups {
        /// Show only binds
        #[arg(long)]
        binds: bool,
    },
    /// Decode a type encoding without reading a binary
    Decode {
        /// The encoded string, e.g. `^{CGRect={CGPoint=dd}{CGSize=dd}}`
        encoding: String,
        /// Treat the input as a method signature
        #[arg(long, conflicts_with = "property")]
        method: bool,
        /// Treat the input as a property attribute string
        #[arg(long)]
        property: bool,
    },
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let output = if cli.json { Output::Json } else { Output::Text };

    if let Some(Commands::Decode {
        encoding,
        method,
        property,
    }) = &cli.command
    {
        let mode = match (method, property) {
            (true, _) => DecodeMode::Method,
            (_, true) => DecodeMode::Property,
            _ => DecodeMode::Type,
        };
        return commands::decode(encoding, mode, output);
    }

    let Some(path) = &cli.binary else {
        bail!("No binary given. Usage: objcray <binary> [command]");
    };

    let data =
        fs::read(path).with_context(|| format!("Failed to read binary: {}", path.display()))?;

    match detect_format(&data) {
        BinaryType::MachO | BinaryType::Fat => {}
        BinaryType::Unknown => bail!("{} is not a Mach-O or fat binary", path.display()),
    }

    let selector = match &cli.arch {
        Some(name) => Some(
            ArchSelector::from_name(name)
                .with_context(|| format!("Unknown architecture '{}'", name))?,
        ),
        None => None,
    };
    let macho = MachO::parse_arch(&data, selector.as_ref())
        .with_context(|| format!("Failed to parse Mach-O file: {}", path.display()))?;
    debug!(arch = macho.architecture().name(), "selected slice");

    let options = ExtractOptions {
        slide: cli.slide,
        decode_types: !cli.raw_types,
    };

    match cli.command {
        Some(Commands::Info) => {
            let metadata = extract(&macho, options);
            let slices = fat_slices(&data)?;
            commands::info(&macho, &metadata, &slices, output)
        }
        Some(Commands::Fixups { binds }) => commands::fixups(&macho, cli.slide, binds, output),
        Some(Commands::Protocols) => commands::protocols(&extract(&macho, options), output),
        Some(Commands::Categories) => commands::categories(&extract(&macho, options), output),
        Some(Commands::Warnings) => commands::warnings(&extract(&macho, options), output),
        Some(Commands::Classes) | None => commands::classes(&extract(&macho, options), output),
        Some(Commands::Decode { .. }) => Ok(()),
    }
}

fn extract(macho: &MachO<'_>, options: ExtractOptions) -> ObjcMetadata {
    let metadata = objcray_objc::extract(macho, options);
    if !metadata.warnings.is_empty() {
        debug!(count = metadata.warnings.len(), "extraction finished with warnings");
    }
    metadata
}

/// Names of the slices in a fat container; empty for thin files.
fn fat_slices(data: &[u8]) -> Result<Vec<&'static str>> {
    if detect_format(data) != BinaryType::Fat {
        return Ok(Vec::new());
    }
    let archs = MachO::fat_architectures(data).context("Failed to read fat header")?;
    Ok(archs
        .iter()
        .map(|arch| Architecture::from_cpu(arch.cputype, arch.cpusubtype).name())
        .collect())
}
