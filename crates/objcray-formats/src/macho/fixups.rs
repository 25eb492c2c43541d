//! Chained fixups (`LC_DYLD_CHAINED_FIXUPS`) decoding.
//!
//! Modern binaries store pointer slots as packed chain entries rather than
//! plain addresses. Each segment lists, per page, the offset of the first
//! entry; every entry carries the stride count to the next one. Walking all
//! chains once yields a map from file offset to the intended rebase target
//! or bound symbol.
//!
//! Bit layouts follow `<mach-o/fixup-chains.h>`.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::load_command::LinkeditData;
use super::segment::Segment;
use crate::{ByteReader, ParseError};

/// Page has no fixups.
pub const DYLD_CHAINED_PTR_START_NONE: u16 = 0xFFFF;
/// Page has several chain starts, listed in the overflow area (32-bit only).
pub const DYLD_CHAINED_PTR_START_MULTI: u16 = 0x8000;
/// Last chain start in an overflow list.
pub const DYLD_CHAINED_PTR_START_LAST: u16 = 0x8000;

/// Special library ordinals.
pub const BIND_SPECIAL_DYLIB_SELF: i32 = 0;
pub const BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE: i32 = -1;
pub const BIND_SPECIAL_DYLIB_FLAT_LOOKUP: i32 = -2;
pub const BIND_SPECIAL_DYLIB_WEAK_LOOKUP: i32 = -3;

const HEADER_SIZE: u64 = 28;

/// Pointer format of one segment's chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PointerFormat {
    Arm64e,
    Ptr64,
    Ptr32,
    Ptr32Cache,
    Ptr32Firmware,
    Ptr64Offset,
    Arm64eKernel,
    Ptr64KernelCache,
    Arm64eUserland,
    Arm64eFirmware,
    X86_64KernelCache,
    Arm64eUserland24,
}

impl PointerFormat {
    /// Decodes a `DYLD_CHAINED_PTR_*` value.
    pub fn from_u16(value: u16) -> Result<Self, ParseError> {
        Ok(match value {
            1 => Self::Arm64e,
            2 => Self::Ptr64,
            3 => Self::Ptr32,
            4 => Self::Ptr32Cache,
            5 => Self::Ptr32Firmware,
            6 => Self::Ptr64Offset,
            7 => Self::Arm64eKernel,
            8 => Self::Ptr64KernelCache,
            9 => Self::Arm64eUserland,
            10 => Self::Arm64eFirmware,
            11 => Self::X86_64KernelCache,
            12 => Self::Arm64eUserland24,
            other => return Err(ParseError::UnsupportedPointerFormat(other)),
        })
    }

    /// Byte distance represented by one unit of an entry's `next` field.
    pub fn stride(self) -> u64 {
        match self {
            Self::Arm64e | Self::Arm64eUserland | Self::Arm64eUserland24 => 8,
            Self::X86_64KernelCache => 1,
            _ => 4,
        }
    }

    /// Width in bytes of one chain entry.
    pub fn entry_size(self) -> u64 {
        if self.is_32bit() {
            4
        } else {
            8
        }
    }

    /// Returns true for the 32-bit entry formats.
    pub fn is_32bit(self) -> bool {
        matches!(self, Self::Ptr32 | Self::Ptr32Cache | Self::Ptr32Firmware)
    }

    fn is_arm64e(self) -> bool {
        matches!(
            self,
            Self::Arm64e
                | Self::Arm64eKernel
                | Self::Arm64eUserland
                | Self::Arm64eFirmware
                | Self::Arm64eUserland24
        )
    }

    /// Returns true if plain rebase targets are offsets from the image base
    /// rather than VM addresses.
    pub fn rebase_target_is_offset(self) -> bool {
        matches!(
            self,
            Self::Ptr64Offset
                | Self::Ptr32Cache
                | Self::Arm64eKernel
                | Self::Arm64eUserland
                | Self::Arm64eUserland24
                | Self::Ptr64KernelCache
                | Self::X86_64KernelCache
        )
    }
}

/// Pointer-authentication key of an authenticated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacKey {
    IA,
    IB,
    DA,
    DB,
}

impl PacKey {
    fn from_bits(bits: u64) -> Self {
        match bits & 0x3 {
            0 => Self::IA,
            1 => Self::IB,
            2 => Self::DA,
            _ => Self::DB,
        }
    }
}

/// Authentication metadata stripped from an authenticated pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointerAuth {
    pub key: PacKey,
    pub diversity: u16,
    pub addr_div: bool,
}

/// One decoded chain entry, before rebase arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChainedPointer {
    /// Rebase to `target` (a VM address or image offset, per format).
    Rebase {
        target: u64,
        high8: u8,
        auth: Option<PointerAuth>,
    },
    /// Bind to import `ordinal` with an inline addend.
    Bind {
        ordinal: u32,
        addend: i64,
        auth: Option<PointerAuth>,
    },
}

#[inline]
fn bits(raw: u64, lo: u32, width: u32) -> u64 {
    (raw >> lo) & ((1u64 << width) - 1)
}

#[inline]
fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

impl ChainedPointer {
    /// Decodes a raw entry. Returns the entry and its `next` field.
    pub fn decode(format: PointerFormat, raw: u64) -> (Self, u64) {
        match format {
            f if f.is_arm64e() => Self::decode_arm64e(f, raw),
            PointerFormat::Ptr64 | PointerFormat::Ptr64Offset => {
                let next = bits(raw, 51, 12);
                if bits(raw, 63, 1) == 1 {
                    let entry = Self::Bind {
                        ordinal: bits(raw, 0, 24) as u32,
                        addend: bits(raw, 24, 8) as i64,
                        auth: None,
                    };
                    (entry, next)
                } else {
                    let entry = Self::Rebase {
                        target: bits(raw, 0, 36),
                        high8: bits(raw, 36, 8) as u8,
                        auth: None,
                    };
                    (entry, next)
                }
            }
            PointerFormat::Ptr64KernelCache | PointerFormat::X86_64KernelCache => {
                let auth = (bits(raw, 63, 1) == 1).then(|| PointerAuth {
                    key: PacKey::from_bits(bits(raw, 49, 2)),
                    diversity: bits(raw, 32, 16) as u16,
                    addr_div: bits(raw, 48, 1) == 1,
                });
                let entry = Self::Rebase {
                    target: bits(raw, 0, 30),
                    high8: 0,
                    auth,
                };
                (entry, bits(raw, 51, 12))
            }
            PointerFormat::Ptr32 => {
                let next = bits(raw, 26, 5);
                if bits(raw, 31, 1) == 1 {
                    let entry = Self::Bind {
                        ordinal: bits(raw, 0, 20) as u32,
                        addend: bits(raw, 20, 6) as i64,
                        auth: None,
                    };
                    (entry, next)
                } else {
                    let entry = Self::Rebase {
                        target: bits(raw, 0, 26),
                        high8: 0,
                        auth: None,
                    };
                    (entry, next)
                }
            }
            PointerFormat::Ptr32Cache => {
                let entry = Self::Rebase {
                    target: bits(raw, 0, 30),
                    high8: 0,
                    auth: None,
                };
                (entry, bits(raw, 30, 2))
            }
            PointerFormat::Ptr32Firmware => {
                let entry = Self::Rebase {
                    target: bits(raw, 0, 26),
                    high8: 0,
                    auth: None,
                };
                (entry, bits(raw, 26, 6))
            }
            // Every arm64e variant is handled by the guard above
            _ => Self::decode_arm64e(format, raw),
        }
    }

    fn decode_arm64e(format: PointerFormat, raw: u64) -> (Self, u64) {
        let next = bits(raw, 51, 11);
        let is_bind = bits(raw, 62, 1) == 1;
        let is_auth = bits(raw, 63, 1) == 1;
        let ordinal_width = if format == PointerFormat::Arm64eUserland24 { 24 } else { 16 };

        let auth = is_auth.then(|| PointerAuth {
            key: PacKey::from_bits(bits(raw, 49, 2)),
            diversity: bits(raw, 32, 16) as u16,
            addr_div: bits(raw, 48, 1) == 1,
        });

        let entry = match (is_bind, is_auth) {
            (true, true) => Self::Bind {
                ordinal: bits(raw, 0, ordinal_width) as u32,
                addend: 0,
                auth,
            },
            (true, false) => Self::Bind {
                ordinal: bits(raw, 0, ordinal_width) as u32,
                addend: sign_extend(bits(raw, 32, 19), 19),
                auth: None,
            },
            (false, true) => Self::Rebase {
                target: bits(raw, 0, 32),
                high8: 0,
                auth,
            },
            (false, false) => Self::Rebase {
                target: bits(raw, 0, 43),
                high8: bits(raw, 43, 8) as u8,
                auth: None,
            },
        };
        (entry, next)
    }

    /// Computes the unslid runtime address of a rebase entry.
    ///
    /// Authenticated targets are always image offsets; plain targets are
    /// offsets or VM addresses depending on the format. PAC bits never reach
    /// the result; `high8` is re-inserted at the top byte.
    pub fn rebase_address(&self, format: PointerFormat, preferred_base: u64) -> Option<u64> {
        match *self {
            Self::Rebase { target, auth: Some(_), .. } => Some(target.wrapping_add(preferred_base)),
            Self::Rebase { target, high8, auth: None } => {
                let base = if format.rebase_target_is_offset() {
                    preferred_base
                } else {
                    0
                };
                Some(target.wrapping_add(base) | ((high8 as u64) << 56))
            }
            Self::Bind { .. } => None,
        }
    }
}

/// Imports table encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImportsFormat {
    Import,
    ImportAddend,
    ImportAddend64,
}

impl ImportsFormat {
    fn from_u32(value: u32) -> Result<Self, ParseError> {
        match value {
            1 => Ok(Self::Import),
            2 => Ok(Self::ImportAddend),
            3 => Ok(Self::ImportAddend64),
            other => Err(ParseError::UnsupportedVersion {
                format: "chained imports",
                version: other,
            }),
        }
    }

    fn entry_size(self) -> u64 {
        match self {
            Self::Import => 4,
            Self::ImportAddend => 8,
            Self::ImportAddend64 => 16,
        }
    }
}

/// A bound symbol from the imports table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainedImport {
    /// Symbol name, e.g. `_OBJC_CLASS_$_NSObject`.
    pub name: String,
    /// Library ordinal (1-based) or one of the `BIND_SPECIAL_DYLIB_*` values.
    pub lib_ordinal: i32,
    pub weak: bool,
    pub addend: i64,
}

/// Chain starts of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentStarts {
    /// Index of the segment in load-command order.
    pub segment_index: u32,
    pub page_size: u16,
    pub pointer_format: PointerFormat,
    /// VM offset of the segment from the image base.
    pub segment_offset: u64,
    pub max_valid_pointer: u32,
    /// Number of pages described.
    pub page_count: u16,
    /// Per-page first-entry offsets (`DYLD_CHAINED_PTR_START_NONE` for none),
    /// followed by any 32-bit overflow starts.
    pub page_starts: Vec<u16>,
}

/// One walked chain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainedFixup {
    /// File offset of the slot within the slice.
    pub file_offset: u64,
    pub format: PointerFormat,
    /// Raw on-disk entry.
    pub raw: u64,
    pub pointer: ChainedPointer,
    /// Unslid runtime address for rebases.
    pub target: Option<u64>,
}

/// A symbol reference produced by a bind.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindTarget {
    pub symbol: String,
    pub lib_ordinal: i32,
    pub weak: bool,
    pub addend: i64,
}

/// The outcome of resolving one pointer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResolvedPointer {
    /// A null slot.
    Null,
    /// A runtime address (slide applied).
    Rebase(u64),
    /// A bound external symbol.
    Bind(BindTarget),
}

impl ResolvedPointer {
    /// Returns the address of a rebase.
    pub fn address(&self) -> Option<u64> {
        match self {
            Self::Rebase(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Returns the bind target, if any.
    pub fn bind(&self) -> Option<&BindTarget> {
        match self {
            Self::Bind(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Decoded `LC_DYLD_CHAINED_FIXUPS` payload with every chain walked.
#[derive(Debug, Clone)]
pub struct ChainedFixups {
    pub version: u32,
    pub imports_format: ImportsFormat,
    pub imports: Vec<ChainedImport>,
    pub starts: Vec<SegmentStarts>,
    fixups: BTreeMap<u64, ChainedFixup>,
}

impl ChainedFixups {
    /// Parses the fixups blob and walks every chain.
    ///
    /// `image` is the whole slice; `segments` are in load-command order, which
    /// is the order the starts table indexes them in.
    pub fn parse(
        image: &ByteReader<'_>,
        command: LinkeditData,
        segments: &[Segment],
        preferred_base: u64,
    ) -> Result<Self, ParseError> {
        let blob = image.sub_reader(command.dataoff as u64, command.datasize as u64)?;
        if (blob.len() as u64) < HEADER_SIZE {
            return Err(ParseError::too_short(HEADER_SIZE as usize, blob.len()));
        }

        let version = blob.read_u32(0)?;
        let starts_offset = blob.read_u32(4)? as u64;
        let imports_offset = blob.read_u32(8)? as u64;
        let symbols_offset = blob.read_u32(12)? as u64;
        let imports_count = blob.read_u32(16)?;
        let imports_format = blob.read_u32(20)?;
        let symbols_format = blob.read_u32(24)?;

        if version != 0 {
            return Err(ParseError::UnsupportedVersion {
                format: "chained fixups",
                version,
            });
        }
        if symbols_format != 0 {
            return Err(ParseError::UnsupportedVersion {
                format: "chained fixups symbol pool",
                version: symbols_format,
            });
        }

        let imports_format = ImportsFormat::from_u32(imports_format)?;
        let imports = Self::parse_imports(
            &blob,
            imports_format,
            imports_offset,
            imports_count,
            symbols_offset,
        )?;
        let starts = Self::parse_starts(&blob, starts_offset)?;

        let mut table = Self {
            version,
            imports_format,
            imports,
            starts,
            fixups: BTreeMap::new(),
        };
        table.walk_chains(image, segments, preferred_base)?;

        debug!(
            imports = table.imports.len(),
            fixups = table.fixups.len(),
            "walked chained fixups"
        );
        Ok(table)
    }

    fn parse_imports(
        blob: &ByteReader<'_>,
        format: ImportsFormat,
        imports_offset: u64,
        count: u32,
        symbols_offset: u64,
    ) -> Result<Vec<ChainedImport>, ParseError> {
        let entry_size = format.entry_size();
        // Reject counts the blob cannot hold before allocating
        blob.read_bytes(imports_offset, count as u64 * entry_size)?;

        let mut imports = Vec::with_capacity(count as usize);
        for i in 0..count as u64 {
            let at = imports_offset + i * entry_size;
            let (lib_ordinal, weak, name_offset, addend) = match format {
                ImportsFormat::Import | ImportsFormat::ImportAddend => {
                    let raw = blob.read_u32(at)? as u64;
                    let ordinal = bits(raw, 0, 8) as u8;
                    let addend = if format == ImportsFormat::ImportAddend {
                        blob.read_i32(at + 4)? as i64
                    } else {
                        0
                    };
                    (
                        special_ordinal(ordinal as u64, 8),
                        bits(raw, 8, 1) == 1,
                        bits(raw, 9, 23),
                        addend,
                    )
                }
                ImportsFormat::ImportAddend64 => {
                    let raw = blob.read_u64(at)?;
                    let addend = blob.read_u64(at + 8)? as i64;
                    (
                        special_ordinal(bits(raw, 0, 16), 16),
                        bits(raw, 16, 1) == 1,
                        bits(raw, 32, 32),
                        addend,
                    )
                }
            };

            let name = blob.read_cstring(symbols_offset + name_offset)?;
            imports.push(ChainedImport {
                name,
                lib_ordinal,
                weak,
                addend,
            });
        }

        Ok(imports)
    }

    fn parse_starts(
        blob: &ByteReader<'_>,
        starts_offset: u64,
    ) -> Result<Vec<SegmentStarts>, ParseError> {
        let seg_count = blob.read_u32(starts_offset)?;
        blob.read_bytes(starts_offset + 4, seg_count as u64 * 4)?;

        let mut starts = Vec::new();
        for seg in 0..seg_count {
            let info_offset = blob.read_u32(starts_offset + 4 + seg as u64 * 4)? as u64;
            if info_offset == 0 {
                continue;
            }

            let at = starts_offset + info_offset;
            let page_size = blob.read_u16(at + 4)?;
            let pointer_format = PointerFormat::from_u16(blob.read_u16(at + 6)?)?;
            let segment_offset = blob.read_u64(at + 8)?;
            let max_valid_pointer = blob.read_u32(at + 16)?;
            let page_count = blob.read_u16(at + 20)?;

            if page_size == 0 {
                return Err(ParseError::invalid_structure(
                    "chained starts",
                    at,
                    "page size of zero",
                ));
            }

            let mut page_starts = Vec::with_capacity(page_count as usize);
            let mut cursor = at + 22;
            for _ in 0..page_count {
                page_starts.push(blob.read_u16(cursor)?);
                cursor += 2;
            }

            // 32-bit formats keep overflow chain starts after page_starts
            if pointer_format.is_32bit() {
                let mut overflow_needed = page_starts.iter().any(|&s| {
                    s != DYLD_CHAINED_PTR_START_NONE && s & DYLD_CHAINED_PTR_START_MULTI != 0
                });
                while overflow_needed {
                    let value = blob.read_u16(cursor)?;
                    page_starts.push(value);
                    cursor += 2;
                    overflow_needed = value & DYLD_CHAINED_PTR_START_LAST == 0;
                }
            }

            starts.push(SegmentStarts {
                segment_index: seg,
                page_size,
                pointer_format,
                segment_offset,
                max_valid_pointer,
                page_count,
                page_starts,
            });
        }

        Ok(starts)
    }

    fn walk_chains(
        &mut self,
        image: &ByteReader<'_>,
        segments: &[Segment],
        preferred_base: u64,
    ) -> Result<(), ParseError> {
        let starts = std::mem::take(&mut self.starts);
        let result = starts.iter().try_for_each(|seg_starts| {
            let segment = segments.get(seg_starts.segment_index as usize).ok_or_else(|| {
                ParseError::invalid_structure(
                    "chained starts",
                    0,
                    format!("segment index {} out of range", seg_starts.segment_index),
                )
            })?;
            self.walk_segment(image, segment, seg_starts, preferred_base)
        });
        self.starts = starts;
        result
    }

    fn walk_segment(
        &mut self,
        image: &ByteReader<'_>,
        segment: &Segment,
        starts: &SegmentStarts,
        preferred_base: u64,
    ) -> Result<(), ParseError> {
        for page in 0..starts.page_count as usize {
            let start = starts.page_starts[page];
            if start == DYLD_CHAINED_PTR_START_NONE {
                continue;
            }

            if starts.pointer_format.is_32bit() && start & DYLD_CHAINED_PTR_START_MULTI != 0 {
                let mut index = (start & !DYLD_CHAINED_PTR_START_MULTI) as usize;
                loop {
                    let entry = *starts.page_starts.get(index).ok_or_else(|| {
                        ParseError::invalid_structure(
                            "chained starts",
                            0,
                            "overflow chain index out of range",
                        )
                    })?;
                    let offset = entry & !DYLD_CHAINED_PTR_START_LAST;
                    self.walk_page(
                        image,
                        segment,
                        starts,
                        page as u32,
                        offset as u64,
                        preferred_base,
                    )?;
                    if entry & DYLD_CHAINED_PTR_START_LAST != 0 {
                        break;
                    }
                    index += 1;
                }
            } else {
                self.walk_page(image, segment, starts, page as u32, start as u64, preferred_base)?;
            }
        }

        Ok(())
    }

    fn walk_page(
        &mut self,
        image: &ByteReader<'_>,
        segment: &Segment,
        starts: &SegmentStarts,
        page: u32,
        first: u64,
        preferred_base: u64,
    ) -> Result<(), ParseError> {
        let format = starts.pointer_format;
        let page_size = starts.page_size as u64;
        let page_base = segment.fileoff + page as u64 * page_size;
        let max_steps = page_size / format.stride() + 1;

        let mut offset_in_page = first;
        let mut steps = 0u64;

        loop {
            let file_offset = page_base + offset_in_page;
            let cycle = ParseError::FixupChainCycle {
                segment: starts.segment_index,
                page,
                offset: file_offset,
            };

            steps += 1;
            if steps > max_steps || self.fixups.contains_key(&file_offset) {
                return Err(cycle);
            }
            if offset_in_page + format.entry_size() > page_size
                || !segment.contains_file_offset(file_offset)
            {
                return Err(ParseError::invalid_structure(
                    "fixup chain",
                    file_offset,
                    format!("entry runs past page {} of {}", page, segment.segname),
                ));
            }

            let raw = match format.entry_size() {
                4 => image.read_u32(file_offset)? as u64,
                _ => image.read_u64(file_offset)?,
            };
            let (pointer, next) = ChainedPointer::decode(format, raw);
            trace!(offset = file_offset, raw, ?pointer, "chain entry");

            let target = match pointer {
                ChainedPointer::Bind { ordinal, .. } => {
                    if ordinal as usize >= self.imports.len() {
                        return Err(ParseError::invalid_structure(
                            "fixup chain",
                            file_offset,
                            format!("bind ordinal {} with {} imports", ordinal, self.imports.len()),
                        ));
                    }
                    None
                }
                // 32-bit targets past max_valid_pointer are plain integers, not pointers
                ChainedPointer::Rebase { target, .. }
                    if format == PointerFormat::Ptr32 && target > starts.max_valid_pointer as u64 =>
                {
                    None
                }
                rebase => rebase.rebase_address(format, preferred_base),
            };

            if target.is_some() || matches!(pointer, ChainedPointer::Bind { .. }) {
                self.fixups.insert(
                    file_offset,
                    ChainedFixup {
                        file_offset,
                        format,
                        raw,
                        pointer,
                        target,
                    },
                );
            }

            if next == 0 {
                return Ok(());
            }
            offset_in_page += next * format.stride();
        }
    }

    /// Returns the walked entry at a file offset.
    pub fn fixup_at(&self, file_offset: u64) -> Option<&ChainedFixup> {
        self.fixups.get(&file_offset)
    }

    /// Iterates every walked entry in file-offset order.
    pub fn fixups(&self) -> impl Iterator<Item = &ChainedFixup> + '_ {
        self.fixups.values()
    }

    /// Number of walked entries.
    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }

    /// Resolves the slot at `file_offset`, adding `slide` to rebases only.
    pub fn resolve(&self, file_offset: u64, slide: u64) -> Option<ResolvedPointer> {
        let fixup = self.fixups.get(&file_offset)?;
        match fixup.pointer {
            ChainedPointer::Bind { ordinal, addend, .. } => {
                let import = self.imports.get(ordinal as usize)?;
                Some(ResolvedPointer::Bind(BindTarget {
                    symbol: import.name.clone(),
                    lib_ordinal: import.lib_ordinal,
                    weak: import.weak,
                    addend: import.addend.wrapping_add(addend),
                }))
            }
            ChainedPointer::Rebase { .. } => fixup
                .target
                .map(|target| ResolvedPointer::Rebase(target.wrapping_add(slide))),
        }
    }
}

/// Sign-extends the small negative special ordinals stored in a `width`-bit field.
fn special_ordinal(raw: u64, width: u32) -> i32 {
    let value = sign_extend(raw, width);
    if value < 0 && value >= BIND_SPECIAL_DYLIB_WEAK_LOOKUP as i64 {
        value as i32
    } else {
        raw as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ptr64_rebase_and_bind() {
        let raw = 0x1_0000_4000u64 | (3u64 << 51);
        let (entry, next) = ChainedPointer::decode(PointerFormat::Ptr64, raw);
        assert_eq!(next, 3);
        assert_eq!(
            entry,
            ChainedPointer::Rebase {
                target: 0x1_0000_4000,
                high8: 0,
                auth: None
            }
        );

        let raw = (1u64 << 63) | (5u64 << 24) | 2;
        let (entry, next) = ChainedPointer::decode(PointerFormat::Ptr64, raw);
        assert_eq!(next, 0);
        assert_eq!(
            entry,
            ChainedPointer::Bind {
                ordinal: 2,
                addend: 5,
                auth: None
            }
        );
    }

    #[test]
    fn test_arm64e_auth_rebase_strips_pac() {
        // auth=1, bind=0, key=DA, addrDiv=1, diversity=0x1234, target=0x8000
        let raw = (1u64 << 63)
            | (2u64 << 49)
            | (1u64 << 48)
            | (0x1234u64 << 32)
            | 0x8000
            | (1u64 << 51);
        let (entry, next) = ChainedPointer::decode(PointerFormat::Arm64e, raw);
        assert_eq!(next, 1);
        let ChainedPointer::Rebase { target, auth: Some(auth), .. } = entry else {
            panic!("expected auth rebase, got {:?}", entry);
        };
        assert_eq!(target, 0x8000);
        assert_eq!(auth.key, PacKey::DA);
        assert_eq!(auth.diversity, 0x1234);
        assert!(auth.addr_div);
        assert_eq!(
            entry.rebase_address(PointerFormat::Arm64e, 0x1_0000_0000),
            Some(0x1_0000_8000)
        );
    }

    #[test]
    fn test_arm64e_plain_rebase_keeps_high8() {
        let raw = 0x1_0000_4000u64 | (0xAAu64 << 43);
        let (entry, _) = ChainedPointer::decode(PointerFormat::Arm64e, raw);
        assert_eq!(
            entry.rebase_address(PointerFormat::Arm64e, 0x1_0000_0000),
            Some(0xAA00_0001_0000_4000)
        );
        // Userland treats the same bits as an offset from the image base
        let (entry, _) = ChainedPointer::decode(PointerFormat::Arm64eUserland, 0x4000);
        assert_eq!(
            entry.rebase_address(PointerFormat::Arm64eUserland, 0x1_0000_0000),
            Some(0x1_0000_4000)
        );
    }

    #[test]
    fn test_arm64e_bind_negative_addend() {
        // addend = -8 in 19 bits
        let addend = ((1u64 << 19) - 8) << 32;
        let raw = (1u64 << 62) | addend | 7;
        let (entry, _) = ChainedPointer::decode(PointerFormat::Arm64e, raw);
        assert_eq!(
            entry,
            ChainedPointer::Bind {
                ordinal: 7,
                addend: -8,
                auth: None
            }
        );
    }

    #[test]
    fn test_userland24_bind_ordinal_width() {
        let raw = (1u64 << 62) | 0x12_3456;
        let (entry, _) = ChainedPointer::decode(PointerFormat::Arm64eUserland24, raw);
        assert!(matches!(entry, ChainedPointer::Bind { ordinal: 0x12_3456, .. }));
        let (entry, _) = ChainedPointer::decode(PointerFormat::Arm64e, raw);
        assert!(matches!(entry, ChainedPointer::Bind { ordinal: 0x3456, .. }));
    }

    #[test]
    fn test_ptr32_layout() {
        let raw = 0x4000u64 | (2u64 << 26);
        let (entry, next) = ChainedPointer::decode(PointerFormat::Ptr32, raw);
        assert_eq!(next, 2);
        assert_eq!(entry.rebase_address(PointerFormat::Ptr32, 0x1000), Some(0x4000));

        let raw = (1u64 << 31) | (3u64 << 20) | 9;
        let (entry, _) = ChainedPointer::decode(PointerFormat::Ptr32, raw);
        assert_eq!(
            entry,
            ChainedPointer::Bind {
                ordinal: 9,
                addend: 3,
                auth: None
            }
        );
    }

    #[test]
    fn test_strides() {
        assert_eq!(PointerFormat::Arm64e.stride(), 8);
        assert_eq!(PointerFormat::Ptr64.stride(), 4);
        assert_eq!(PointerFormat::X86_64KernelCache.stride(), 1);
        assert_eq!(PointerFormat::Ptr32.entry_size(), 4);
        assert!(matches!(
            PointerFormat::from_u16(99),
            Err(ParseError::UnsupportedPointerFormat(99))
        ));
    }

    #[test]
    fn test_special_ordinals() {
        assert_eq!(special_ordinal(0xFF, 8), BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE);
        assert_eq!(special_ordinal(0xFE, 8), BIND_SPECIAL_DYLIB_FLAT_LOOKUP);
        assert_eq!(special_ordinal(0xFD, 8), BIND_SPECIAL_DYLIB_WEAK_LOOKUP);
        assert_eq!(special_ordinal(0xF0, 8), 0xF0);
        assert_eq!(special_ordinal(1, 8), 1);
        assert_eq!(special_ordinal(0xFFFF, 16), -1);
    }

    mod chains {
        use super::super::*;
        use crate::macho::builder::{self, ChainStarts, ChainedFixupsBuilder, MachOBuilder};
        use crate::macho::{MachO, CPU_TYPE_ARM, CPU_TYPE_ARM64, VM_PROT_READ, VM_PROT_WRITE};
        use crate::Bitness;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        const BASE: u64 = 0x1_0000_0000;

        fn ptr64_image(page_start: u16) -> Vec<u8> {
            let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_ARM64);
            b.add_segment("__TEXT", BASE, 0x4000, 0, 0x4000, VM_PROT_READ);
            let rw = VM_PROT_READ | VM_PROT_WRITE;
            b.add_segment("__DATA", BASE + 0x4000, 0x4000, 0x4000, 0x4000, rw);
            b.add_segment("__LINKEDIT", BASE + 0x8000, 0x1000, 0x8000, 0x1000, VM_PROT_READ);

            let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr64, 3);
            let ordinal = fixups.import("_OBJC_CLASS_$_NSObject", 1, false);
            fixups.segment(1, 0x4000, &[page_start]);

            let at = 0x4000 + page_start as u64;
            b.write_u64(at, builder::ptr64_rebase(BASE + 0x4100, 2));
            b.write_u64(at + 8, builder::ptr64_bind(ordinal, 0, 0));
            b.add_chained_fixups(0x8000, &fixups.build());
            b.build()
        }

        #[test]
        fn test_resolves_rebase_and_bind() {
            let data = ptr64_image(0);
            let macho = MachO::parse(&data).unwrap();
            assert!(macho.fixup_errors().is_empty());
            let chains = macho.chained_fixups().unwrap();
            assert_eq!(chains.len(), 2);
            assert_eq!(chains.imports[0].lib_ordinal, 1);

            let resolver = macho.resolver();
            assert_eq!(
                resolver.resolve_at(0x4000).unwrap(),
                ResolvedPointer::Rebase(BASE + 0x4100)
            );
            match resolver.resolve_at(0x4008).unwrap() {
                ResolvedPointer::Bind(target) => {
                    assert_eq!(target.symbol, "_OBJC_CLASS_$_NSObject");
                    assert_eq!(target.lib_ordinal, 1);
                    assert!(!target.weak);
                }
                other => panic!("expected bind, got {:?}", other),
            }
        }

        #[test]
        fn test_slide_moves_rebases_only() {
            let data = ptr64_image(0x20);
            let macho = MachO::parse(&data).unwrap();
            let resolver = macho.resolver();
            let unslid = resolver.resolve_at(0x4020).unwrap();
            let slid = resolver.resolve_at_with_adjustment(0x4020, 0x8000).unwrap();
            assert_eq!(slid.address(), unslid.address().map(|a| a + 0x8000));
            assert_eq!(
                resolver.resolve_at_with_adjustment(0x4028, 0x8000).unwrap(),
                resolver.resolve_at(0x4028).unwrap()
            );
        }

        #[test]
        fn test_chain_past_page_end() {
            let data = ptr64_image(0x3FFC);
            let macho = MachO::parse(&data).unwrap();
            // The image is still usable, just without chains
            assert!(macho.chained_fixups().is_none());
            assert!(matches!(
                macho.fixup_errors(),
                [ParseError::InvalidStructure { .. }]
            ));
        }

        #[test]
        fn test_repeated_start_is_a_cycle() {
            let mut b = MachOBuilder::new(Bitness::Bits32, CPU_TYPE_ARM);
            b.add_segment("__TEXT", 0x4000, 0x4000, 0, 0x4000, VM_PROT_READ);
            b.add_segment("__DATA", 0x8000, 0x4000, 0x4000, 0x4000, VM_PROT_READ | VM_PROT_WRITE);
            b.add_segment("__LINKEDIT", 0xC000, 0x1000, 0x8000, 0x1000, VM_PROT_READ);
            b.write_u32(0x4010, builder::ptr32_rebase(0x8100, 0));

            let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr32, 3);
            fixups.starts(ChainStarts {
                segment_index: 1,
                page_size: 0x1000,
                segment_offset: 0x4000,
                max_valid_pointer: 0x10_0000,
                page_starts: vec![
                    DYLD_CHAINED_PTR_START_MULTI | 1,
                    0x10,
                    0x10 | DYLD_CHAINED_PTR_START_LAST,
                ],
                page_count: 1,
            });
            b.add_chained_fixups(0x8000, &fixups.build());
            let data = b.build();

            let macho = MachO::parse(&data).unwrap();
            assert_eq!(
                macho.fixup_errors(),
                &[ParseError::FixupChainCycle {
                    segment: 1,
                    page: 0,
                    offset: 0x4010
                }]
            );
            // Falls back to the raw value
            assert_eq!(
                macho.resolver().resolve_at(0x4010).unwrap(),
                ResolvedPointer::Rebase(builder::ptr32_rebase(0x8100, 0) as u64)
            );
        }

        /// A slot in a generated chain: rebase target or import index.
        #[derive(Debug, Clone)]
        enum Entry {
            Rebase(u64),
            Bind(usize),
        }

        const SYMBOLS: [&str; 3] = [
            "_OBJC_CLASS_$_NSObject",
            "_OBJC_METACLASS_$_NSObject",
            "__objc_empty_cache",
        ];

        fn chain_entries() -> impl Strategy<Value = BTreeMap<u64, Entry>> {
            let entry = prop_oneof![
                3 => (0u64..0x1_0000).prop_map(|t| Entry::Rebase(BASE + 8 * t)),
                1 => (0..SYMBOLS.len()).prop_map(Entry::Bind),
            ];
            prop::collection::btree_map((0u64..0x800).prop_map(|slot| slot * 8), entry, 1..64)
        }

        fn chained_image(entries: &BTreeMap<u64, Entry>) -> Vec<u8> {
            let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_ARM64);
            b.add_segment("__TEXT", BASE, 0x4000, 0, 0x4000, VM_PROT_READ);
            let rw = VM_PROT_READ | VM_PROT_WRITE;
            b.add_segment("__DATA", BASE + 0x4000, 0x4000, 0x4000, 0x4000, rw);
            b.add_segment("__LINKEDIT", BASE + 0x8000, 0x1000, 0x8000, 0x1000, VM_PROT_READ);

            let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr64, 3);
            let ordinals: Vec<u32> = SYMBOLS.iter().map(|s| fixups.import(s, 1, false)).collect();

            let offsets: Vec<u64> = entries.keys().copied().collect();
            for (i, (at, entry)) in entries.iter().enumerate() {
                let next = offsets.get(i + 1).map_or(0, |n| (n - at) / 4);
                let raw = match entry {
                    Entry::Rebase(target) => builder::ptr64_rebase(*target, next),
                    Entry::Bind(import) => builder::ptr64_bind(ordinals[*import], 0, next),
                };
                b.write_u64(0x4000 + at, raw);
            }
            fixups.segment(1, 0x4000, &[offsets[0] as u16]);
            b.add_chained_fixups(0x8000, &fixups.build());
            b.build()
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            /// Every slot resolves exactly, and a slide moves rebases only.
            #[test]
            fn chain_resolution_and_slide(
                entries in chain_entries(),
                slide in 0u64..0x1_0000_0000,
            ) {
                let data = chained_image(&entries);
                let macho = MachO::parse(&data).unwrap();
                prop_assert!(macho.fixup_errors().is_empty());
                prop_assert_eq!(macho.chained_fixups().map(|c| c.len()), Some(entries.len()));

                let resolver = macho.resolver();
                for (at, entry) in &entries {
                    let offset = 0x4000 + at;
                    let plain = resolver.resolve_at(offset).unwrap();
                    let slid = resolver.resolve_at_with_adjustment(offset, slide).unwrap();
                    match entry {
                        Entry::Rebase(target) => {
                            prop_assert_eq!(&plain, &ResolvedPointer::Rebase(*target));
                            prop_assert_eq!(slid, ResolvedPointer::Rebase(target + slide));
                        }
                        Entry::Bind(import) => {
                            match &plain {
                                ResolvedPointer::Bind(target) => {
                                    prop_assert_eq!(target.symbol.as_str(), SYMBOLS[*import]);
                                    prop_assert_eq!(target.lib_ordinal, 1);
                                }
                                other => prop_assert!(false, "expected bind, got {:?}", other),
                            }
                            prop_assert_eq!(slid, plain);
                        }
                    }
                }
            }

            /// Revisiting a chain start is reported as a cycle wherever it sits.
            #[test]
            fn repeated_start_is_always_a_cycle(slot in 0u16..0x400) {
                let start = slot * 4;
                let mut b = MachOBuilder::new(Bitness::Bits32, CPU_TYPE_ARM);
                b.add_segment("__TEXT", 0x4000, 0x4000, 0, 0x4000, VM_PROT_READ);
                let rw = VM_PROT_READ | VM_PROT_WRITE;
                b.add_segment("__DATA", 0x8000, 0x4000, 0x4000, 0x4000, rw);
                b.add_segment("__LINKEDIT", 0xC000, 0x1000, 0x8000, 0x1000, VM_PROT_READ);
                b.write_u32(0x4000 + start as u64, builder::ptr32_rebase(0x8100, 0));

                let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr32, 3);
                fixups.starts(ChainStarts {
                    segment_index: 1,
                    page_size: 0x1000,
                    segment_offset: 0x4000,
                    max_valid_pointer: 0x10_0000,
                    page_starts: vec![
                        DYLD_CHAINED_PTR_START_MULTI | 1,
                        start,
                        start | DYLD_CHAINED_PTR_START_LAST,
                    ],
                    page_count: 1,
                });
                b.add_chained_fixups(0x8000, &fixups.build());
                let data = b.build();

                let macho = MachO::parse(&data).unwrap();
                prop_assert_eq!(
                    macho.fixup_errors(),
                    &[ParseError::FixupChainCycle {
                        segment: 1,
                        page: 0,
                        offset: 0x4000 + start as u64,
                    }]
                );
            }
        }

        #[test]
        fn test_ptr32_non_pointer_is_skipped() {
            let mut b = MachOBuilder::new(Bitness::Bits32, CPU_TYPE_ARM);
            b.add_segment("__TEXT", 0x4000, 0x4000, 0, 0x4000, VM_PROT_READ);
            b.add_segment("__DATA", 0x8000, 0x4000, 0x4000, 0x4000, VM_PROT_READ | VM_PROT_WRITE);
            b.add_segment("__LINKEDIT", 0xC000, 0x1000, 0x8000, 0x1000, VM_PROT_READ);
            b.write_u32(0x4000, builder::ptr32_rebase(0x8100, 1));
            b.write_u32(0x4004, builder::ptr32_rebase(0x30_0000, 0));

            let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr32, 3);
            fixups.starts(ChainStarts {
                segment_index: 1,
                page_size: 0x1000,
                segment_offset: 0x4000,
                max_valid_pointer: 0x10_0000,
                page_starts: vec![0],
                page_count: 1,
            });
            b.add_chained_fixups(0x8000, &fixups.build());
            let data = b.build();

            let macho = MachO::parse(&data).unwrap();
            let chains = macho.chained_fixups().unwrap();
            assert_eq!(chains.len(), 1);
            assert_eq!(chains.resolve(0x4000, 0), Some(ResolvedPointer::Rebase(0x8100)));
            assert!(chains.fixup_at(0x4004).is_none());
        }
    }
}
