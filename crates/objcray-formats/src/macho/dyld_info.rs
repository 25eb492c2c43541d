//! Legacy `LC_DYLD_INFO` bind opcode streams.
//!
//! Binaries built before chained fixups describe external references as a
//! byte-coded program. Running it yields the file offsets of bound slots and
//! the symbols they refer to.

use std::collections::BTreeMap;

use tracing::debug;

use super::fixups::{BindTarget, BIND_SPECIAL_DYLIB_WEAK_LOOKUP};
use super::load_command::DyldInfo;
use super::segment::Segment;
use crate::{Bitness, ByteReader, ParseError};

pub const BIND_OPCODE_MASK: u8 = 0xF0;
pub const BIND_IMMEDIATE_MASK: u8 = 0x0F;
pub const BIND_OPCODE_DONE: u8 = 0x00;
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
pub const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
pub const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
pub const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
pub const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
pub const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
pub const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
pub const BIND_OPCODE_DO_BIND: u8 = 0x90;
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xA0;
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xB0;
pub const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xC0;
pub const BIND_OPCODE_THREADED: u8 = 0xD0;

pub const BIND_SYMBOL_FLAGS_WEAK_IMPORT: u8 = 0x1;
pub const BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION: u8 = 0x8;

/// Bound slots keyed by file offset.
#[derive(Debug, Clone, Default)]
pub struct BindTable {
    binds: BTreeMap<u64, BindTarget>,
}

impl BindTable {
    /// Runs the bind and weak-bind streams of an `LC_DYLD_INFO` command.
    pub fn parse(
        image: &ByteReader<'_>,
        info: &DyldInfo,
        segments: &[Segment],
        bitness: Bitness,
    ) -> Result<Self, ParseError> {
        let mut table = Self::default();
        if info.bind_size > 0 {
            let stream = image.sub_reader(info.bind_off as u64, info.bind_size as u64)?;
            table.run(&stream, segments, bitness, false)?;
        }
        if info.weak_bind_size > 0 {
            let stream = image.sub_reader(info.weak_bind_off as u64, info.weak_bind_size as u64)?;
            table.run(&stream, segments, bitness, true)?;
        }
        debug!(binds = table.binds.len(), "ran bind opcodes");
        Ok(table)
    }

    fn run(
        &mut self,
        stream: &ByteReader<'_>,
        segments: &[Segment],
        bitness: Bitness,
        weak_stream: bool,
    ) -> Result<(), ParseError> {
        let ptr_size = bitness.pointer_size() as u64;
        let mut pc = 0u64;
        let mut ordinal: i32 = if weak_stream { BIND_SPECIAL_DYLIB_WEAK_LOOKUP } else { 0 };
        let mut symbol = String::new();
        let mut flags = 0u8;
        let mut addend = 0i64;
        let mut segment: Option<&Segment> = None;
        let mut offset = 0u64;

        while pc < stream.len() as u64 {
            let byte = stream.read_u8(pc)?;
            pc += 1;
            let opcode = byte & BIND_OPCODE_MASK;
            let imm = byte & BIND_IMMEDIATE_MASK;

            match opcode {
                BIND_OPCODE_DONE => {
                    if !weak_stream {
                        break;
                    }
                }
                BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => ordinal = imm as i32,
                BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                    let (value, len) = stream.read_uleb128(pc)?;
                    pc += len;
                    ordinal = value as i32;
                }
                BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                    ordinal = if imm == 0 {
                        0
                    } else {
                        (BIND_OPCODE_MASK | imm) as i8 as i32
                    };
                }
                BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                    symbol = stream.read_cstring(pc)?;
                    pc += symbol.len() as u64 + 1;
                    flags = imm;
                }
                BIND_OPCODE_SET_TYPE_IMM => {}
                BIND_OPCODE_SET_ADDEND_SLEB => {
                    let (value, len) = stream.read_sleb128(pc)?;
                    pc += len;
                    addend = value;
                }
                BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                    let (value, len) = stream.read_uleb128(pc)?;
                    pc += len;
                    segment = Some(segments.get(imm as usize).ok_or_else(|| {
                        let message = format!("segment {} out of range", imm);
                        ParseError::invalid_structure("bind opcodes", pc, message)
                    })?);
                    offset = value;
                }
                BIND_OPCODE_ADD_ADDR_ULEB => {
                    let (value, len) = stream.read_uleb128(pc)?;
                    pc += len;
                    offset = offset.wrapping_add(value);
                }
                BIND_OPCODE_DO_BIND => {
                    self.bind(segment, offset, &symbol, ordinal, flags, addend, pc)?;
                    offset = offset.wrapping_add(ptr_size);
                }
                BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                    self.bind(segment, offset, &symbol, ordinal, flags, addend, pc)?;
                    let (value, len) = stream.read_uleb128(pc)?;
                    pc += len;
                    offset = offset.wrapping_add(value).wrapping_add(ptr_size);
                }
                BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                    self.bind(segment, offset, &symbol, ordinal, flags, addend, pc)?;
                    offset = offset.wrapping_add(imm as u64 * ptr_size + ptr_size);
                }
                BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                    let (count, len) = stream.read_uleb128(pc)?;
                    pc += len;
                    let (skip, len) = stream.read_uleb128(pc)?;
                    pc += len;
                    for _ in 0..count {
                        // Every iteration must land inside the segment, which bounds the loop
                        self.bind(segment, offset, &symbol, ordinal, flags, addend, pc)?;
                        offset = offset.wrapping_add(skip).wrapping_add(ptr_size);
                    }
                }
                BIND_OPCODE_THREADED => {
                    return Err(ParseError::UnsupportedVersion {
                        format: "threaded bind opcodes",
                        version: imm as u32,
                    });
                }
                _ => {
                    return Err(ParseError::invalid_structure(
                        "bind opcodes",
                        pc - 1,
                        format!("unknown opcode 0x{:02x}", byte),
                    ));
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn bind(
        &mut self,
        segment: Option<&Segment>,
        offset: u64,
        symbol: &str,
        ordinal: i32,
        flags: u8,
        addend: i64,
        pc: u64,
    ) -> Result<(), ParseError> {
        let segment = segment.ok_or_else(|| {
            ParseError::invalid_structure("bind opcodes", pc, "bind before segment was set")
        })?;
        if offset >= segment.filesize {
            return Err(ParseError::invalid_structure(
                "bind opcodes",
                pc,
                format!("offset 0x{:x} outside {}", offset, segment.segname),
            ));
        }
        if flags & BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION != 0 {
            return Ok(());
        }

        self.binds.insert(
            segment.fileoff + offset,
            BindTarget {
                symbol: symbol.to_string(),
                lib_ordinal: ordinal,
                weak: flags & BIND_SYMBOL_FLAGS_WEAK_IMPORT != 0,
                addend,
            },
        );
        Ok(())
    }

    /// Returns the bind at a file offset.
    pub fn get(&self, file_offset: u64) -> Option<&BindTarget> {
        self.binds.get(&file_offset)
    }

    /// Iterates binds in file-offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &BindTarget)> + '_ {
        self.binds.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Endianness;

    fn data_segment() -> Segment {
        Segment {
            segname: "__DATA".to_string(),
            vmaddr: 0x1_0000_4000,
            vmsize: 0x1000,
            fileoff: 0x4000,
            filesize: 0x1000,
            maxprot: 3,
            initprot: 3,
            flags: 0,
            sections: Vec::new(),
        }
    }

    fn info_for(stream_len: usize) -> DyldInfo {
        DyldInfo {
            bind_off: 0,
            bind_size: stream_len as u32,
            ..DyldInfo::default()
        }
    }

    #[test]
    fn test_bind_times_skipping() {
        let segments = vec![data_segment(), data_segment()];
        let mut stream = vec![BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | 2];
        stream.push(BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM);
        stream.extend_from_slice(b"_OBJC_CLASS_$_NSObject\0");
        stream.push(BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 1);
        stream.push(0x10);
        stream.push(BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB);
        stream.push(3);
        stream.push(8);
        stream.push(BIND_OPCODE_DONE);

        let image = ByteReader::new(&stream, Endianness::Little);
        let info = info_for(stream.len());
        let table = BindTable::parse(&image, &info, &segments, Bitness::Bits64).unwrap();

        let offsets: Vec<u64> = table.iter().map(|(off, _)| off).collect();
        assert_eq!(offsets, vec![0x4010, 0x4020, 0x4030]);
        let target = table.get(0x4020).unwrap();
        assert_eq!(target.symbol, "_OBJC_CLASS_$_NSObject");
        assert_eq!(target.lib_ordinal, 2);
    }

    #[test]
    fn test_special_ordinal_and_addend() {
        let segments = vec![data_segment()];
        let mut stream = vec![BIND_OPCODE_SET_DYLIB_SPECIAL_IMM | 0x0E];
        stream.push(BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM | BIND_SYMBOL_FLAGS_WEAK_IMPORT);
        stream.extend_from_slice(b"_x\0");
        stream.push(BIND_OPCODE_SET_ADDEND_SLEB);
        stream.push(0x7C); // -4
        stream.push(BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB);
        stream.push(0);
        stream.push(BIND_OPCODE_DO_BIND);

        let image = ByteReader::new(&stream, Endianness::Little);
        let info = info_for(stream.len());
        let table = BindTable::parse(&image, &info, &segments, Bitness::Bits64).unwrap();
        let target = table.get(0x4000).unwrap();
        assert_eq!(target.lib_ordinal, -2);
        assert_eq!(target.addend, -4);
        assert!(target.weak);
    }

    #[test]
    fn test_bind_outside_segment_fails() {
        let segments = vec![data_segment()];
        let stream = vec![
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB,
            0x80,
            0x40, // 0x2000, past the segment
            BIND_OPCODE_DO_BIND,
        ];
        let image = ByteReader::new(&stream, Endianness::Little);
        let result = BindTable::parse(&image, &info_for(stream.len()), &segments, Bitness::Bits64);
        assert!(matches!(result, Err(ParseError::InvalidStructure { .. })));
    }
}
