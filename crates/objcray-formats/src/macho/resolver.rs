//! Pointer-slot resolution.

use super::dyld_info::BindTable;
use super::fixups::{ChainedFixups, ResolvedPointer};
use crate::{Bitness, ByteReader, ParseError};

/// Resolves pointer-sized slots of one image to rebased addresses or binds.
///
/// Lookups consult the walked fixup chains first, then the legacy bind table,
/// and finally fall back to the raw on-disk value as a direct address.
#[derive(Debug, Clone)]
pub struct PointerResolver<'a> {
    image: ByteReader<'a>,
    bitness: Bitness,
    chains: Option<ChainedFixups>,
    binds: BindTable,
}

impl<'a> PointerResolver<'a> {
    pub fn new(
        image: ByteReader<'a>,
        bitness: Bitness,
        chains: Option<ChainedFixups>,
        binds: BindTable,
    ) -> Self {
        Self {
            image,
            bitness,
            chains,
            binds,
        }
    }

    /// Resolves the slot at `file_offset` with no load slide.
    pub fn resolve_at(&self, file_offset: u64) -> Result<ResolvedPointer, ParseError> {
        self.resolve_at_with_adjustment(file_offset, 0)
    }

    /// Resolves the slot at `file_offset`, adding `adjustment` to rebased addresses.
    ///
    /// Binds are never adjusted. A zero raw value outside any chain resolves
    /// to [`ResolvedPointer::Null`].
    pub fn resolve_at_with_adjustment(
        &self,
        file_offset: u64,
        adjustment: u64,
    ) -> Result<ResolvedPointer, ParseError> {
        if let Some(resolved) = self
            .chains
            .as_ref()
            .and_then(|chains| chains.resolve(file_offset, adjustment))
        {
            return Ok(resolved);
        }

        if let Some(target) = self.binds.get(file_offset) {
            return Ok(ResolvedPointer::Bind(target.clone()));
        }

        let raw = self.image.read_pointer(file_offset, self.bitness)?;
        if raw == 0 {
            Ok(ResolvedPointer::Null)
        } else {
            Ok(ResolvedPointer::Rebase(raw.wrapping_add(adjustment)))
        }
    }

    /// Walked chained fixups, if the image has any.
    pub fn chained_fixups(&self) -> Option<&ChainedFixups> {
        self.chains.as_ref()
    }

    /// Legacy binds from `LC_DYLD_INFO`.
    pub fn binds(&self) -> &BindTable {
        &self.binds
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }
}
