//! Fixup listing.

use anyhow::Result;
use objcray_formats::{MachO, ResolvedPointer};
use serde::Serialize;

use super::{print_json, Output};

#[derive(Serialize)]
struct FixupEntry {
    /// Slot address, slide applied.
    address: u64,
    file_offset: u64,
    resolved: ResolvedPointer,
    #[serde(skip_serializing_if = "Option::is_none")]
    library: Option<String>,
}

fn entry(macho: &MachO<'_>, file_offset: u64, slide: u64) -> Result<FixupEntry> {
    let address = macho.file_to_vm(file_offset)?.wrapping_add(slide);
    let resolved = macho.resolver().resolve_at_with_adjustment(file_offset, slide)?;
    let library = resolved
        .bind()
        .and_then(|b| macho.library_for_ordinal(b.lib_ordinal))
        .map(str::to_string);
    Ok(FixupEntry {
        address,
        file_offset,
        resolved,
        library,
    })
}

/// Handle the `fixups` command.
///
/// Lists chained fixups when present, else the legacy bind table.
pub fn fixups(macho: &MachO<'_>, slide: u64, binds_only: bool, output: Output) -> Result<()> {
    let offsets: Vec<u64> = match macho.chained_fixups() {
        Some(chains) => chains.fixups().map(|f| f.file_offset).collect(),
        None => macho.resolver().binds().iter().map(|(offset, _)| offset).collect(),
    };

    let mut entries = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let entry = entry(macho, offset, slide)?;
        if binds_only && entry.resolved.bind().is_none() {
            continue;
        }
        entries.push(entry);
    }

    if output == Output::Json {
        return print_json(&entries);
    }

    for err in macho.fixup_errors() {
        eprintln!("warning: fixups ignored: {}", err);
    }
    for e in &entries {
        match &e.resolved {
            ResolvedPointer::Null => println!("{:#014x}  null", e.address),
            ResolvedPointer::Rebase(target) => {
                println!("{:#014x}  rebase  {:#x}", e.address, target)
            }
            ResolvedPointer::Bind(bind) => {
                let mut line = format!("{:#014x}  bind    {}", e.address, bind.symbol);
                if bind.addend != 0 {
                    line.push_str(&format!(" + {:#x}", bind.addend));
                }
                if bind.weak {
                    line.push_str(" (weak)");
                }
                if let Some(lib) = &e.library {
                    line.push_str(&format!("  [{}]", lib));
                }
                println!("{}", line);
            }
        }
    }
    println!("{} entries", entries.len());
    Ok(())
}
