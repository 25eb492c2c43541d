//! Mach-O (macOS/iOS) binary format parser.
//!
//! Handles thin and universal (fat) files, 32 and 64-bit slices in either
//! byte order, and the pointer fixup schemes needed to follow data pointers
//! in a file on disk:
//! - chained fixups (`LC_DYLD_CHAINED_FIXUPS`)
//! - legacy bind opcodes (`LC_DYLD_INFO`)
//! - plain pointers

mod dyld_info;
mod fixups;
mod header;
mod load_command;
mod resolver;
mod segment;

#[cfg(any(test, feature = "test-util"))]
pub mod builder;

pub use dyld_info::BindTable;
pub use fixups::{
    BindTarget, ChainedFixup, ChainedFixups, ChainedImport, ChainedPointer, ImportsFormat, PacKey,
    PointerAuth, PointerFormat, ResolvedPointer, SegmentStarts, BIND_SPECIAL_DYLIB_FLAT_LOOKUP,
    BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE, BIND_SPECIAL_DYLIB_SELF, BIND_SPECIAL_DYLIB_WEAK_LOOKUP,
    DYLD_CHAINED_PTR_START_LAST, DYLD_CHAINED_PTR_START_MULTI, DYLD_CHAINED_PTR_START_NONE,
};
pub use header::*;
pub use load_command::*;
pub use resolver::PointerResolver;
pub use segment::*;

use tracing::{debug, warn};

use crate::{ArchSelector, Architecture, Bitness, ByteReader, Endianness, ParseError};

/// A parsed Mach-O slice.
#[derive(Debug, Clone)]
pub struct MachO<'a> {
    /// Bytes of this slice only; every file offset is relative to it.
    reader: ByteReader<'a>,
    /// Offset of the slice within its container (non-zero for fat members).
    slice_offset: u64,
    /// Parsed Mach-O header.
    pub header: MachHeader,
    /// Load commands in file order.
    pub load_commands: Vec<LoadCommand>,
    /// Segments in load-command order.
    pub segments: Vec<Segment>,
    resolver: PointerResolver<'a>,
    /// Fixup tables that failed to parse; the image is still usable without them.
    fixup_errors: Vec<ParseError>,
}

impl<'a> MachO<'a> {
    /// Parse a Mach-O file from raw bytes.
    ///
    /// For fat binaries the x86_64 slice is preferred, then arm64, then the first.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        Self::parse_arch(data, None)
    }

    /// Parse the slice matching `selector`.
    ///
    /// A thin file must itself match the selector.
    pub fn parse_arch(data: &'a [u8], selector: Option<&ArchSelector>) -> Result<Self, ParseError> {
        if !is_fat(data) {
            let macho = Self::parse_slice(data, 0)?;
            if let Some(selector) = selector {
                if !selector.matches(macho.header.cputype, macho.header.cpusubtype) {
                    return Err(ParseError::ArchitectureNotFound {
                        cputype: selector.cputype,
                    });
                }
            }
            return Ok(macho);
        }

        let fat = FatHeader::parse(data)?;
        let arch = match selector {
            Some(selector) => fat
                .architectures
                .iter()
                .find(|a| selector.matches(a.cputype, a.cpusubtype))
                .ok_or(ParseError::ArchitectureNotFound {
                    cputype: selector.cputype,
                })?,
            None => fat
                .architectures
                .iter()
                .find(|a| a.cputype == CPU_TYPE_X86_64)
                .or_else(|| fat.architectures.iter().find(|a| a.cputype == CPU_TYPE_ARM64))
                .or_else(|| fat.architectures.first())
                .ok_or_else(|| {
                    ParseError::invalid_structure("fat header", 0, "no architectures in fat binary")
                })?,
        };

        debug!(arch = arch.architecture().name(), offset = arch.offset, "selected fat slice");

        let container = ByteReader::new(data, Endianness::Little);
        let slice = container.read_bytes(arch.offset, arch.size).map_err(|_| {
            ParseError::invalid_structure(
                "fat arch",
                arch.offset,
                format!("slice of {:#x} bytes runs past end of file", arch.size),
            )
        })?;
        Self::parse_slice(slice, arch.offset)
    }

    /// Lists the slices of a fat file. Thin files yield an empty list.
    pub fn fat_architectures(data: &[u8]) -> Result<Vec<FatArch>, ParseError> {
        if is_fat(data) {
            Ok(FatHeader::parse(data)?.architectures)
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_slice(data: &'a [u8], slice_offset: u64) -> Result<Self, ParseError> {
        let header = MachHeader::parse(data)?;
        let reader = ByteReader::new(data, header.endianness);

        let load_commands = Self::parse_load_commands(&reader, &header)?;

        let segments: Vec<Segment> = load_commands
            .iter()
            .filter_map(|lc| match lc {
                LoadCommand::Segment(seg) | LoadCommand::Segment64(seg) => Some(seg.clone()),
                _ => None,
            })
            .collect();

        for (index, segment) in segments.iter().enumerate() {
            segment.validate(reader.len() as u64).map_err(|err| {
                ParseError::malformed_command(index as u32, segment.fileoff, err.to_string())
            })?;
        }

        debug!(
            arch = header.architecture().name(),
            commands = load_commands.len(),
            segments = segments.len(),
            "parsed Mach-O header"
        );

        let mut macho = Self {
            reader,
            slice_offset,
            resolver: PointerResolver::new(reader, header.bitness, None, BindTable::default()),
            header,
            load_commands,
            segments,
            fixup_errors: Vec::new(),
        };
        macho.resolver = macho.build_resolver();
        Ok(macho)
    }

    fn parse_load_commands(
        reader: &ByteReader<'a>,
        header: &MachHeader,
    ) -> Result<Vec<LoadCommand>, ParseError> {
        let start = header.header_size() as u64;
        let total = header.sizeofcmds as u64;
        let table = reader.sub_reader(start, total).map_err(|_| {
            let message = format!("{} bytes of commands exceed the image", total);
            ParseError::malformed_command(0, start, message)
        })?;

        // Every command is at least 8 bytes, so sizeofcmds bounds the count
        let mut commands = Vec::with_capacity((header.ncmds as u64).min(total / 8) as usize);
        let mut offset = 0u64;

        for index in 0..header.ncmds {
            let at = start + offset;
            if offset + 8 > total {
                return Err(ParseError::malformed_command(
                    index,
                    at,
                    "command header past sizeofcmds",
                ));
            }

            let cmdsize = table.read_u32(offset + 4)? as u64;
            if cmdsize == 0 {
                return Err(ParseError::malformed_command(index, at, "cmdsize is zero"));
            }
            if cmdsize < 8 {
                return Err(ParseError::malformed_command(
                    index,
                    at,
                    format!("cmdsize {} is smaller than a command header", cmdsize),
                ));
            }
            if offset + cmdsize > total {
                return Err(ParseError::malformed_command(
                    index,
                    at,
                    format!("cmdsize {} runs past sizeofcmds {}", cmdsize, total),
                ));
            }

            let cmd = table.sub_reader(offset, cmdsize)?;
            let command = LoadCommand::parse(&cmd)
                .map_err(|err| ParseError::malformed_command(index, at, err.to_string()))?;
            commands.push(command);

            offset += cmdsize;
        }

        Ok(commands)
    }

    fn build_resolver(&mut self) -> PointerResolver<'a> {
        let preferred_base = self.preferred_load_address();
        let mut chains = None;
        let mut binds = BindTable::default();

        for lc in &self.load_commands {
            match lc {
                LoadCommand::ChainedFixups(data) => {
                    match ChainedFixups::parse(
                        &self.reader,
                        *data,
                        &self.segments,
                        preferred_base,
                    ) {
                        Ok(table) => chains = Some(table),
                        Err(err) => {
                            warn!(error = %err, "ignoring chained fixups");
                            self.fixup_errors.push(err);
                        }
                    }
                }
                LoadCommand::DyldInfo { info, .. } => {
                    match BindTable::parse(
                        &self.reader,
                        info,
                        &self.segments,
                        self.header.bitness,
                    ) {
                        Ok(table) => binds = table,
                        Err(err) => {
                            warn!(error = %err, "ignoring bind opcodes");
                            self.fixup_errors.push(err);
                        }
                    }
                }
                _ => {}
            }
        }

        PointerResolver::new(self.reader, self.header.bitness, chains, binds)
    }

    /// Reader over this slice's bytes.
    pub fn reader(&self) -> &ByteReader<'a> {
        &self.reader
    }

    /// Raw bytes of this slice.
    pub fn data(&self) -> &'a [u8] {
        self.reader.data()
    }

    /// Offset of this slice inside its fat container, or 0.
    pub fn slice_offset(&self) -> u64 {
        self.slice_offset
    }

    pub fn architecture(&self) -> Architecture {
        self.header.architecture()
    }

    pub fn bitness(&self) -> Bitness {
        self.header.bitness
    }

    pub fn endianness(&self) -> Endianness {
        self.header.endianness
    }

    pub fn pointer_size(&self) -> usize {
        self.header.bitness.pointer_size()
    }

    /// Pointer resolver for this slice.
    pub fn resolver(&self) -> &PointerResolver<'a> {
        &self.resolver
    }

    /// Walked chained fixups, if present and well-formed.
    pub fn chained_fixups(&self) -> Option<&ChainedFixups> {
        self.resolver.chained_fixups()
    }

    /// Errors from fixup tables that were skipped.
    pub fn fixup_errors(&self) -> &[ParseError] {
        &self.fixup_errors
    }

    /// Get a segment by name.
    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.segname == name)
    }

    /// Iterates every section of every segment.
    pub fn sections(&self) -> impl Iterator<Item = &Section> + '_ {
        self.segments.iter().flat_map(|seg| seg.sections.iter())
    }

    /// Get a section by segment and section name.
    pub fn section(&self, segname: &str, sectname: &str) -> Option<&Section> {
        self.segment_by_name(segname)?.section_by_name(sectname)
    }

    /// Finds `sectname` in the first of `segnames` that has it.
    pub fn find_section(&self, sectname: &str, segnames: &[&str]) -> Option<&Section> {
        segnames.iter().find_map(|seg| self.section(seg, sectname))
    }

    /// Returns the file bytes backing a section. Zerofill sections are empty.
    pub fn section_data(&self, section: &Section) -> Result<&'a [u8], ParseError> {
        section.data(&self.reader)
    }

    /// Returns the segment whose VM range covers `addr`.
    pub fn segment_for_address(&self, addr: u64) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.vmsize > 0 && s.contains_address(addr))
    }

    /// Translates a VM address to a file offset within this slice.
    ///
    /// Addresses in the zero-filled tail of a segment have no file backing
    /// and are reported as unmapped.
    pub fn vm_to_file(&self, addr: u64) -> Result<u64, ParseError> {
        self.segments
            .iter()
            .filter(|s| s.filesize > 0 && s.contains_address(addr))
            .find_map(|s| {
                let delta = addr - s.vmaddr;
                (delta < s.filesize).then(|| s.fileoff + delta)
            })
            .ok_or(ParseError::AddressNotMapped(addr))
    }

    /// Translates a file offset within this slice to a VM address.
    pub fn file_to_vm(&self, offset: u64) -> Result<u64, ParseError> {
        self.segments
            .iter()
            .find(|s| s.filesize > 0 && s.contains_file_offset(offset))
            .map(|s| s.vmaddr + (offset - s.fileoff))
            .ok_or(ParseError::AddressNotMapped(offset))
    }

    /// Returns true if `addr` is backed by file data.
    pub fn is_mapped(&self, addr: u64) -> bool {
        self.vm_to_file(addr).is_ok()
    }

    /// VM address the image expects to be loaded at: that of the segment
    /// mapping file offset 0, else the lowest non-empty segment.
    pub fn preferred_load_address(&self) -> u64 {
        self.segments
            .iter()
            .find(|s| s.fileoff == 0 && s.filesize > 0)
            .or_else(|| {
                self.segments
                    .iter()
                    .filter(|s| s.filesize > 0)
                    .min_by_key(|s| s.vmaddr)
            })
            .map(|s| s.vmaddr)
            .unwrap_or(0)
    }

    /// Reads `len` bytes at a VM address, without crossing the segment's file data.
    pub fn bytes_at(&self, addr: u64, len: u64) -> Result<&'a [u8], ParseError> {
        let (segment_reader, offset) = self.segment_reader_at(addr)?;
        segment_reader.read_bytes(offset, len)
    }

    /// Reads a NUL-terminated string at a VM address.
    pub fn cstring_at(&self, addr: u64) -> Result<String, ParseError> {
        let (segment_reader, offset) = self.segment_reader_at(addr)?;
        segment_reader.read_cstring(offset)
    }

    fn segment_reader_at(&self, addr: u64) -> Result<(ByteReader<'a>, u64), ParseError> {
        let file_offset = self.vm_to_file(addr)?;
        let segment = self
            .segments
            .iter()
            .find(|s| s.filesize > 0 && s.contains_file_offset(file_offset))
            .ok_or(ParseError::AddressNotMapped(addr))?;
        let segment_reader = self.reader.sub_reader(segment.fileoff, segment.filesize)?;
        Ok((segment_reader, file_offset - segment.fileoff))
    }

    /// Install names of linked dylibs, in ordinal order (ordinal 1 first).
    pub fn dylib_names(&self) -> Vec<&str> {
        self.load_commands
            .iter()
            .filter_map(|lc| match lc {
                LoadCommand::LoadDylib { dylib, .. } => Some(dylib.name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Install name for a bind library ordinal.
    pub fn library_for_ordinal(&self, ordinal: i32) -> Option<&str> {
        if ordinal < 1 {
            return None;
        }
        self.dylib_names().get(ordinal as usize - 1).copied()
    }

    /// This image's own install name, for dylibs.
    pub fn install_name(&self) -> Option<&str> {
        self.load_commands.iter().find_map(|lc| match lc {
            LoadCommand::IdDylib(dylib) => Some(dylib.name.as_str()),
            _ => None,
        })
    }

    /// Encryption info from `LC_ENCRYPTION_INFO(_64)`.
    pub fn encryption_info(&self) -> Option<EncryptionInfo> {
        self.load_commands.iter().find_map(|lc| match lc {
            LoadCommand::EncryptionInfo { info, .. } => Some(*info),
            _ => None,
        })
    }

    /// Returns true if any part of the image is encrypted on disk.
    pub fn is_encrypted(&self) -> bool {
        self.encryption_info().is_some_and(|info| info.is_encrypted())
            || self.segments.iter().any(Segment::is_protected)
    }

    /// Returns true if the file offset lies in an encrypted range.
    pub fn is_encrypted_offset(&self, offset: u64) -> bool {
        self.encryption_info().is_some_and(|info| info.covers(offset))
    }

    /// Image UUID, if present.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.load_commands.iter().find_map(|lc| match lc {
            LoadCommand::Uuid(uuid) => Some(*uuid),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::builder::MachOBuilder;
    use super::*;

    fn simple_image() -> Vec<u8> {
        let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_ARM64);
        b.add_segment("__PAGEZERO", 0, 0x1_0000_0000, 0, 0, 0);
        b.add_segment("__TEXT", 0x1_0000_0000, 0x4000, 0, 0x4000, VM_PROT_READ | VM_PROT_EXECUTE);
        let rw = VM_PROT_READ | VM_PROT_WRITE;
        let data = b.add_segment("__DATA", 0x1_0000_4000, 0x8000, 0x4000, 0x4000, rw);
        b.add_section(data, "__objc_classlist", 0x1_0000_4000, 0x10);
        b.add_zerofill_section(data, "__bss", 0x1_0000_8000, 0x100);
        b.add_dylib("/usr/lib/libobjc.A.dylib");
        b.write_u64(0x4000, 0x1_0000_4100);
        b.build()
    }

    #[test]
    fn test_parse_simple() {
        let data = simple_image();
        let macho = MachO::parse(&data).unwrap();
        assert_eq!(macho.architecture(), Architecture::Arm64);
        assert_eq!(macho.segments.len(), 3);
        assert_eq!(macho.preferred_load_address(), 0x1_0000_0000);
        assert_eq!(macho.dylib_names(), vec!["/usr/lib/libobjc.A.dylib"]);
        assert_eq!(macho.library_for_ordinal(1), Some("/usr/lib/libobjc.A.dylib"));
        assert!(macho.library_for_ordinal(0).is_none());
        assert!(macho.find_section("__objc_classlist", &["__DATA_CONST", "__DATA"]).is_some());
        assert!(!macho.is_encrypted());
    }

    #[test]
    fn test_address_translation() {
        let data = simple_image();
        let macho = MachO::parse(&data).unwrap();
        assert_eq!(macho.vm_to_file(0x1_0000_4010).unwrap(), 0x4010);
        assert_eq!(macho.file_to_vm(0x4010).unwrap(), 0x1_0000_4010);
        // Zero page and the zero-filled tail of __DATA have no file bytes
        assert_eq!(macho.vm_to_file(0x10), Err(ParseError::AddressNotMapped(0x10)));
        assert_eq!(
            macho.vm_to_file(0x1_0000_9000),
            Err(ParseError::AddressNotMapped(0x1_0000_9000))
        );
        assert_eq!(macho.segment_for_address(0x1_0000_9000).unwrap().segname, "__DATA");
    }

    #[test]
    fn test_plain_pointer_resolution() {
        let data = simple_image();
        let macho = MachO::parse(&data).unwrap();
        let resolver = macho.resolver();
        assert_eq!(resolver.resolve_at(0x4000).unwrap(), ResolvedPointer::Rebase(0x1_0000_4100));
        assert_eq!(
            resolver.resolve_at_with_adjustment(0x4000, 0x1000).unwrap(),
            ResolvedPointer::Rebase(0x1_0000_5100)
        );
        assert_eq!(resolver.resolve_at(0x4008).unwrap(), ResolvedPointer::Null);
    }

    #[test]
    fn test_zero_cmdsize_is_malformed() {
        let mut data = simple_image();
        // First command follows the 32-byte header
        data[32 + 4..32 + 8].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            MachO::parse(&data),
            Err(ParseError::MalformedLoadCommands { index: 0, .. })
        ));
    }

    #[test]
    fn test_cmdsize_past_total_is_malformed() {
        let mut data = simple_image();
        data[32 + 4..32 + 8].copy_from_slice(&0x10_0000u32.to_le_bytes());
        assert!(matches!(
            MachO::parse(&data),
            Err(ParseError::MalformedLoadCommands { .. })
        ));
    }

    #[test]
    fn test_segment_past_end_is_malformed() {
        let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_X86_64);
        b.add_segment("__TEXT", 0x1000, 0x1000, 0, 0x1000, VM_PROT_READ);
        let mut data = b.build();
        data.truncate(0x800);
        assert!(matches!(
            MachO::parse(&data),
            Err(ParseError::MalformedLoadCommands { .. })
        ));
    }

    #[test]
    fn test_thin_arch_mismatch() {
        let data = simple_image();
        let selector = ArchSelector::new(CPU_TYPE_X86_64);
        assert_eq!(
            MachO::parse_arch(&data, Some(&selector)).unwrap_err(),
            ParseError::ArchitectureNotFound {
                cputype: CPU_TYPE_X86_64
            }
        );
        assert!(MachO::parse_arch(&data, ArchSelector::from_name("arm64").as_ref()).is_ok());
    }

    #[test]
    fn test_fat_selection() {
        let arm = simple_image();
        let mut b = MachOBuilder::new(Bitness::Bits32, CPU_TYPE_ARM);
        b.add_segment("__TEXT", 0x4000, 0x1000, 0, 0x1000, VM_PROT_READ);
        let armv7 = b.build();

        let fat = builder::fat(&[
            (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7, armv7.as_slice()),
            (CPU_TYPE_ARM64, 0, arm.as_slice()),
        ]);
        let archs = MachO::fat_architectures(&fat).unwrap();
        assert_eq!(archs.len(), 2);

        let default = MachO::parse(&fat).unwrap();
        assert_eq!(default.architecture(), Architecture::Arm64);
        assert_eq!(default.slice_offset(), archs[1].offset);
        // Offsets stay slice-relative
        assert_eq!(default.vm_to_file(0x1_0000_4000).unwrap(), 0x4000);

        let v7 = MachO::parse_arch(&fat, ArchSelector::from_name("armv7").as_ref()).unwrap();
        assert_eq!(v7.bitness(), Bitness::Bits32);

        let missing = MachO::parse_arch(&fat, Some(&ArchSelector::new(CPU_TYPE_X86_64)));
        assert!(matches!(missing, Err(ParseError::ArchitectureNotFound { .. })));
    }

    #[test]
    fn test_encryption_flag() {
        let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_ARM64);
        b.add_segment("__TEXT", 0x1_0000_0000, 0x4000, 0, 0x4000, VM_PROT_READ);
        b.add_encryption_info(0x1000, 0x2000, 1);
        let data = b.build();
        let macho = MachO::parse(&data).unwrap();
        assert!(macho.is_encrypted());
        assert!(macho.is_encrypted_offset(0x1800));
        assert!(!macho.is_encrypted_offset(0x3800));
    }
}
