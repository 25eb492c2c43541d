//! Synthetic Mach-O images for tests and fuzzing.
//!
//! Only available with the `test-util` feature.

use super::fixups::{PointerFormat, DYLD_CHAINED_PTR_START_NONE};
use super::header::{FAT_MAGIC, MH_EXECUTE, MH_MAGIC, MH_MAGIC_64};
use super::load_command::{
    LC_DYLD_CHAINED_FIXUPS, LC_DYLD_INFO_ONLY, LC_ENCRYPTION_INFO, LC_ENCRYPTION_INFO_64,
    LC_LOAD_DYLIB, LC_SEGMENT, LC_SEGMENT_64, LC_UUID,
};
use super::segment::S_ZEROFILL;
use crate::{Bitness, Endianness};

struct SegmentSpec {
    name: String,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    initprot: u32,
    sections: Vec<SectionSpec>,
}

struct SectionSpec {
    name: String,
    addr: u64,
    size: u64,
    offset: u32,
    flags: u32,
}

/// Assembles a thin Mach-O image.
///
/// Segment contents are written with the `write_*` helpers at file offsets;
/// the header and load commands are laid over the start of the buffer by
/// [`MachOBuilder::build`], so keep the first page free of content.
pub struct MachOBuilder {
    bitness: Bitness,
    endian: Endianness,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    segments: Vec<SegmentSpec>,
    commands: Vec<Vec<u8>>,
    data: Vec<u8>,
}

impl MachOBuilder {
    pub fn new(bitness: Bitness, cputype: u32) -> Self {
        Self {
            bitness,
            endian: Endianness::Little,
            cputype,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            segments: Vec::new(),
            commands: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.endian = Endianness::Big;
        self
    }

    pub fn cpusubtype(mut self, cpusubtype: u32) -> Self {
        self.cpusubtype = cpusubtype;
        self
    }

    pub fn filetype(mut self, filetype: u32) -> Self {
        self.filetype = filetype;
        self
    }

    /// Adds a segment and returns its index.
    pub fn add_segment(
        &mut self,
        name: &str,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        initprot: u32,
    ) -> usize {
        self.segments.push(SegmentSpec {
            name: name.to_string(),
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            initprot,
            sections: Vec::new(),
        });
        self.grow(fileoff + filesize);
        self.segments.len() - 1
    }

    /// Adds a file-backed section to segment `segment` at VM address `addr`.
    pub fn add_section(&mut self, segment: usize, name: &str, addr: u64, size: u64) {
        let seg = &mut self.segments[segment];
        let offset = (seg.fileoff + (addr - seg.vmaddr)) as u32;
        seg.sections.push(SectionSpec {
            name: name.to_string(),
            addr,
            size,
            offset,
            flags: 0,
        });
    }

    /// Adds a zero-filled section.
    pub fn add_zerofill_section(&mut self, segment: usize, name: &str, addr: u64, size: u64) {
        self.segments[segment].sections.push(SectionSpec {
            name: name.to_string(),
            addr,
            size,
            offset: 0,
            flags: S_ZEROFILL,
        });
    }

    /// Appends a raw load command; `body` excludes the cmd/cmdsize header.
    pub fn add_command(&mut self, cmd: u32, body: &[u8]) {
        let align = self.bitness.pointer_size();
        let mut bytes = Vec::new();
        self.put_u32(&mut bytes, cmd);
        let size = (8 + body.len()).div_ceil(align) * align;
        self.put_u32(&mut bytes, size as u32);
        bytes.extend_from_slice(body);
        bytes.resize(size, 0);
        self.commands.push(bytes);
    }

    pub fn add_dylib(&mut self, name: &str) {
        let mut body = Vec::new();
        self.put_u32(&mut body, 24);
        self.put_u32(&mut body, 2);
        self.put_u32(&mut body, 0x0001_0000);
        self.put_u32(&mut body, 0x0001_0000);
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        self.add_command(LC_LOAD_DYLIB, &body);
    }

    pub fn add_uuid(&mut self, uuid: [u8; 16]) {
        self.add_command(LC_UUID, &uuid);
    }

    pub fn add_encryption_info(&mut self, cryptoff: u32, cryptsize: u32, cryptid: u32) {
        let mut body = Vec::new();
        self.put_u32(&mut body, cryptoff);
        self.put_u32(&mut body, cryptsize);
        self.put_u32(&mut body, cryptid);
        let cmd = match self.bitness {
            Bitness::Bits64 => {
                self.put_u32(&mut body, 0);
                LC_ENCRYPTION_INFO_64
            }
            Bitness::Bits32 => LC_ENCRYPTION_INFO,
        };
        self.add_command(cmd, &body);
    }

    /// Places a chained fixups blob at `dataoff` and references it.
    pub fn add_chained_fixups(&mut self, dataoff: u64, blob: &[u8]) {
        self.write_bytes(dataoff, blob);
        let mut body = Vec::new();
        self.put_u32(&mut body, dataoff as u32);
        self.put_u32(&mut body, blob.len() as u32);
        self.add_command(LC_DYLD_CHAINED_FIXUPS, &body);
    }

    /// Places a bind opcode stream at `dataoff` and references it from `LC_DYLD_INFO_ONLY`.
    pub fn add_bind_opcodes(&mut self, dataoff: u64, stream: &[u8]) {
        self.write_bytes(dataoff, stream);
        let mut body = Vec::new();
        for value in [0, 0, dataoff as u32, stream.len() as u32, 0, 0, 0, 0, 0, 0] {
            self.put_u32(&mut body, value);
        }
        self.add_command(LC_DYLD_INFO_ONLY, &body);
    }

    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) {
        let end = offset as usize + bytes.len();
        self.grow(end as u64);
        self.data[offset as usize..end].copy_from_slice(bytes);
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) {
        let mut bytes = Vec::new();
        self.put_u32(&mut bytes, value);
        self.write_bytes(offset, &bytes);
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) {
        let bytes = match self.endian {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.write_bytes(offset, &bytes);
    }

    /// Writes a pointer-sized value.
    pub fn write_pointer(&mut self, offset: u64, value: u64) {
        match self.bitness {
            Bitness::Bits64 => self.write_u64(offset, value),
            Bitness::Bits32 => self.write_u32(offset, value as u32),
        }
    }

    fn grow(&mut self, len: u64) {
        if self.data.len() < len as usize {
            self.data.resize(len as usize, 0);
        }
    }

    fn put_u32(&self, out: &mut Vec<u8>, value: u32) {
        match self.endian {
            Endianness::Little => out.extend_from_slice(&value.to_le_bytes()),
            Endianness::Big => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_word(&self, out: &mut Vec<u8>, value: u64) {
        match (self.bitness, self.endian) {
            (Bitness::Bits32, _) => self.put_u32(out, value as u32),
            (Bitness::Bits64, Endianness::Little) => out.extend_from_slice(&value.to_le_bytes()),
            (Bitness::Bits64, Endianness::Big) => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn segment_command(&self, seg: &SegmentSpec) -> Vec<u8> {
        let (cmd, header_size, section_size) = match self.bitness {
            Bitness::Bits64 => (LC_SEGMENT_64, 72, 80),
            Bitness::Bits32 => (LC_SEGMENT, 56, 68),
        };
        let mut out = Vec::new();
        self.put_u32(&mut out, cmd);
        self.put_u32(&mut out, (header_size + section_size * seg.sections.len()) as u32);
        out.extend_from_slice(&fixed_name(&seg.name));
        self.put_word(&mut out, seg.vmaddr);
        self.put_word(&mut out, seg.vmsize);
        self.put_word(&mut out, seg.fileoff);
        self.put_word(&mut out, seg.filesize);
        self.put_u32(&mut out, seg.initprot);
        self.put_u32(&mut out, seg.initprot);
        self.put_u32(&mut out, seg.sections.len() as u32);
        self.put_u32(&mut out, 0);

        for sect in &seg.sections {
            out.extend_from_slice(&fixed_name(&sect.name));
            out.extend_from_slice(&fixed_name(&seg.name));
            self.put_word(&mut out, sect.addr);
            self.put_word(&mut out, sect.size);
            self.put_u32(&mut out, sect.offset);
            for value in [3, 0, 0, sect.flags, 0, 0] {
                self.put_u32(&mut out, value);
            }
            if self.bitness == Bitness::Bits64 {
                self.put_u32(&mut out, 0);
            }
        }
        out
    }

    /// Produces the image bytes, padded to the end of the last segment.
    pub fn build(&self) -> Vec<u8> {
        let mut commands: Vec<Vec<u8>> =
            self.segments.iter().map(|s| self.segment_command(s)).collect();
        commands.extend(self.commands.iter().cloned());
        let sizeofcmds: usize = commands.iter().map(Vec::len).sum();

        let mut header = Vec::new();
        let magic = match self.bitness {
            Bitness::Bits64 => MH_MAGIC_64,
            Bitness::Bits32 => MH_MAGIC,
        };
        self.put_u32(&mut header, magic);
        self.put_u32(&mut header, self.cputype);
        self.put_u32(&mut header, self.cpusubtype);
        self.put_u32(&mut header, self.filetype);
        self.put_u32(&mut header, commands.len() as u32);
        self.put_u32(&mut header, sizeofcmds as u32);
        self.put_u32(&mut header, 0);
        if self.bitness == Bitness::Bits64 {
            self.put_u32(&mut header, 0);
        }
        for cmd in commands {
            header.extend_from_slice(&cmd);
        }

        let file_end = self
            .segments
            .iter()
            .map(|s| (s.fileoff + s.filesize) as usize)
            .max()
            .unwrap_or(0);
        let mut out = self.data.clone();
        out.resize(out.len().max(header.len()).max(file_end), 0);
        out[..header.len()].copy_from_slice(&header);
        out
    }
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let len = name.len().min(16);
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

/// Wraps thin images into a big-endian fat container, one slice per
/// `(cputype, cpusubtype, bytes)`, each aligned to 16 KiB.
pub fn fat(slices: &[(u32, u32, &[u8])]) -> Vec<u8> {
    const ALIGN: usize = 0x4000;
    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());

    let mut offset = ALIGN;
    let mut placements = Vec::new();
    for (cputype, cpusubtype, bytes) in slices {
        out.extend_from_slice(&cputype.to_be_bytes());
        out.extend_from_slice(&cpusubtype.to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&14u32.to_be_bytes());
        placements.push(offset);
        offset += bytes.len().div_ceil(ALIGN) * ALIGN;
    }

    for ((_, _, bytes), at) in slices.iter().zip(placements) {
        out.resize(at, 0);
        out.extend_from_slice(bytes);
    }
    out
}

/// Segment chain starts for [`ChainedFixupsBuilder`].
pub struct ChainStarts {
    pub segment_index: usize,
    pub page_size: u16,
    pub segment_offset: u64,
    pub max_valid_pointer: u32,
    /// Page starts followed by any overflow entries.
    pub page_starts: Vec<u16>,
    /// Number of real pages at the front of `page_starts`.
    pub page_count: u16,
}

/// Assembles an `LC_DYLD_CHAINED_FIXUPS` payload with `DYLD_CHAINED_IMPORT` entries.
pub struct ChainedFixupsBuilder {
    format: PointerFormat,
    segment_count: usize,
    starts: Vec<ChainStarts>,
    imports: Vec<(String, u8, bool)>,
}

impl ChainedFixupsBuilder {
    pub fn new(format: PointerFormat, segment_count: usize) -> Self {
        Self {
            format,
            segment_count,
            starts: Vec::new(),
            imports: Vec::new(),
        }
    }

    /// Adds one chain start per page for segment `segment_index`.
    pub fn segment(
        &mut self,
        segment_index: usize,
        segment_offset: u64,
        page_starts: &[u16],
    ) -> &mut Self {
        self.starts.push(ChainStarts {
            segment_index,
            page_size: 0x4000,
            segment_offset,
            max_valid_pointer: 0,
            page_starts: page_starts.to_vec(),
            page_count: page_starts.len() as u16,
        });
        self
    }

    /// Adds fully specified starts, for 32-bit overflow lists.
    pub fn starts(&mut self, seg: ChainStarts) -> &mut Self {
        self.starts.push(seg);
        self
    }

    /// Adds an import; the returned ordinal is what bind entries refer to.
    pub fn import(&mut self, name: &str, lib_ordinal: u8, weak: bool) -> u32 {
        self.imports.push((name.to_string(), lib_ordinal, weak));
        (self.imports.len() - 1) as u32
    }

    pub fn build(&self) -> Vec<u8> {
        let format_value: u16 = match self.format {
            PointerFormat::Arm64e => 1,
            PointerFormat::Ptr64 => 2,
            PointerFormat::Ptr32 => 3,
            PointerFormat::Ptr32Cache => 4,
            PointerFormat::Ptr32Firmware => 5,
            PointerFormat::Ptr64Offset => 6,
            PointerFormat::Arm64eKernel => 7,
            PointerFormat::Ptr64KernelCache => 8,
            PointerFormat::Arm64eUserland => 9,
            PointerFormat::Arm64eFirmware => 10,
            PointerFormat::X86_64KernelCache => 11,
            PointerFormat::Arm64eUserland24 => 12,
        };

        // starts_in_image
        let starts_offset = 32usize;
        let mut starts = Vec::new();
        starts.extend_from_slice(&(self.segment_count as u32).to_le_bytes());
        let table_len = 4 + 4 * self.segment_count;
        let mut seg_infos: Vec<Vec<u8>> = Vec::new();
        let mut info_offsets = vec![0u32; self.segment_count];
        let mut cursor = table_len.div_ceil(8) * 8;
        for seg in &self.starts {
            let mut info = Vec::new();
            let size = 22 + 2 * seg.page_starts.len();
            info.extend_from_slice(&(size as u32).to_le_bytes());
            info.extend_from_slice(&seg.page_size.to_le_bytes());
            info.extend_from_slice(&format_value.to_le_bytes());
            info.extend_from_slice(&seg.segment_offset.to_le_bytes());
            info.extend_from_slice(&seg.max_valid_pointer.to_le_bytes());
            info.extend_from_slice(&seg.page_count.to_le_bytes());
            for start in &seg.page_starts {
                info.extend_from_slice(&start.to_le_bytes());
            }
            info.resize(size.div_ceil(8) * 8, 0);
            info_offsets[seg.segment_index] = cursor as u32;
            cursor += info.len();
            seg_infos.push(info);
        }
        for offset in &info_offsets {
            starts.extend_from_slice(&offset.to_le_bytes());
        }
        starts.resize(table_len.div_ceil(8) * 8, 0);
        for info in seg_infos {
            starts.extend_from_slice(&info);
        }

        let imports_offset = starts_offset + starts.len();
        let mut imports = Vec::new();
        let mut symbols = vec![0u8];
        for (name, ordinal, weak) in &self.imports {
            let name_offset = symbols.len() as u32;
            symbols.extend_from_slice(name.as_bytes());
            symbols.push(0);
            let raw = *ordinal as u32 | ((*weak as u32) << 8) | (name_offset << 9);
            imports.extend_from_slice(&raw.to_le_bytes());
        }
        let symbols_offset = imports_offset + imports.len();

        let mut out = Vec::new();
        for value in [
            0u32,
            starts_offset as u32,
            imports_offset as u32,
            symbols_offset as u32,
            self.imports.len() as u32,
            1,
            0,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.resize(starts_offset, 0);
        out.extend_from_slice(&starts);
        out.extend_from_slice(&imports);
        out.extend_from_slice(&symbols);
        out
    }
}

/// Page start value for a page without fixups.
pub const NO_FIXUPS: u16 = DYLD_CHAINED_PTR_START_NONE;

/// Encodes a `DYLD_CHAINED_PTR_64` rebase entry.
pub fn ptr64_rebase(target: u64, next: u64) -> u64 {
    (target & ((1 << 36) - 1)) | (next << 51)
}

/// Encodes a `DYLD_CHAINED_PTR_64` bind entry.
pub fn ptr64_bind(ordinal: u32, addend: u8, next: u64) -> u64 {
    (1 << 63) | (next << 51) | ((addend as u64) << 24) | ordinal as u64
}

/// Encodes a `DYLD_CHAINED_PTR_32` rebase entry.
pub fn ptr32_rebase(target: u32, next: u32) -> u32 {
    (target & ((1 << 26) - 1)) | (next << 26)
}
