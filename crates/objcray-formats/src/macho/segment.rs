//! Mach-O segment and section parsing.

use crate::{ByteReader, ParseError};

// Section types (low byte of flags)
pub const SECTION_TYPE: u32 = 0x0000_00FF;
pub const S_ZEROFILL: u32 = 0x1;
pub const S_GB_ZEROFILL: u32 = 0xC;
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

// Section attributes
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

// VM protection flags
pub const VM_PROT_READ: u32 = 0x01;
pub const VM_PROT_WRITE: u32 = 0x02;
pub const VM_PROT_EXECUTE: u32 = 0x04;

// Segment flags
pub const SG_PROTECTED_VERSION_1: u32 = 0x8;

const SEGMENT_32_SIZE: u64 = 56;
const SEGMENT_64_SIZE: u64 = 72;
const SECTION_32_SIZE: u64 = 68;
const SECTION_64_SIZE: u64 = 80;

/// A Mach-O segment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// Segment name (up to 16 characters).
    pub segname: String,
    /// Virtual memory address.
    pub vmaddr: u64,
    /// Virtual memory size.
    pub vmsize: u64,
    /// File offset.
    pub fileoff: u64,
    /// File size.
    pub filesize: u64,
    /// Maximum VM protection.
    pub maxprot: u32,
    /// Initial VM protection.
    pub initprot: u32,
    /// Flags.
    pub flags: u32,
    /// Sections in this segment.
    pub sections: Vec<Section>,
}

impl Segment {
    /// Parse a 32-bit segment command. `cmd` is a reader over the whole command.
    pub fn parse_32(cmd: &ByteReader<'_>) -> Result<Self, ParseError> {
        if (cmd.len() as u64) < SEGMENT_32_SIZE {
            return Err(ParseError::too_short(SEGMENT_32_SIZE as usize, cmd.len()));
        }

        let nsects = cmd.read_u32(48)?;
        let mut segment = Self {
            segname: parse_name(cmd.read_bytes(8, 16)?),
            vmaddr: cmd.read_u32(24)? as u64,
            vmsize: cmd.read_u32(28)? as u64,
            fileoff: cmd.read_u32(32)? as u64,
            filesize: cmd.read_u32(36)? as u64,
            maxprot: cmd.read_u32(40)?,
            initprot: cmd.read_u32(44)?,
            flags: cmd.read_u32(52)?,
            sections: Vec::new(),
        };
        segment.sections = Self::parse_sections(
            cmd,
            nsects,
            SEGMENT_32_SIZE,
            SECTION_32_SIZE,
            Section::parse_32,
        )?;
        Ok(segment)
    }

    /// Parse a 64-bit segment command. `cmd` is a reader over the whole command.
    pub fn parse_64(cmd: &ByteReader<'_>) -> Result<Self, ParseError> {
        if (cmd.len() as u64) < SEGMENT_64_SIZE {
            return Err(ParseError::too_short(SEGMENT_64_SIZE as usize, cmd.len()));
        }

        let nsects = cmd.read_u32(64)?;
        let mut segment = Self {
            segname: parse_name(cmd.read_bytes(8, 16)?),
            vmaddr: cmd.read_u64(24)?,
            vmsize: cmd.read_u64(32)?,
            fileoff: cmd.read_u64(40)?,
            filesize: cmd.read_u64(48)?,
            maxprot: cmd.read_u32(56)?,
            initprot: cmd.read_u32(60)?,
            flags: cmd.read_u32(68)?,
            sections: Vec::new(),
        };
        segment.sections = Self::parse_sections(
            cmd,
            nsects,
            SEGMENT_64_SIZE,
            SECTION_64_SIZE,
            Section::parse_64,
        )?;
        Ok(segment)
    }

    fn parse_sections(
        cmd: &ByteReader<'_>,
        nsects: u32,
        header_size: u64,
        entry_size: u64,
        parse: fn(&ByteReader<'_>, u64) -> Result<Section, ParseError>,
    ) -> Result<Vec<Section>, ParseError> {
        // The section headers must fit inside the command itself
        let needed = header_size + nsects as u64 * entry_size;
        if needed > cmd.len() as u64 {
            return Err(ParseError::invalid_structure(
                "segment",
                0,
                format!("{} sections need {} bytes, command has {}", nsects, needed, cmd.len()),
            ));
        }

        (0..nsects as u64)
            .map(|i| parse(cmd, header_size + i * entry_size))
            .collect()
    }

    /// Checks the segment against the slice size and its own sections.
    pub fn validate(&self, image_len: u64) -> Result<(), ParseError> {
        let file_end = self
            .fileoff
            .checked_add(self.filesize)
            .ok_or(ParseError::Overflow { context: "segment file range" })?;
        let vm_end = self
            .vmaddr
            .checked_add(self.vmsize)
            .ok_or(ParseError::Overflow { context: "segment VM range" })?;

        if file_end > image_len {
            return Err(ParseError::invalid_structure(
                "segment",
                self.fileoff,
                format!(
                    "{} file range ends at {:#x}, past image end {:#x}",
                    self.segname, file_end, image_len
                ),
            ));
        }

        for section in &self.sections {
            let sect_end = section
                .addr
                .checked_add(section.size)
                .ok_or(ParseError::Overflow { context: "section VM range" })?;
            // Object files put every section in one unnamed segment; ranges still nest
            if section.addr < self.vmaddr || sect_end > vm_end {
                return Err(ParseError::invalid_structure(
                    "section",
                    section.offset as u64,
                    format!("{} lies outside its segment {}", section.full_name(), self.segname),
                ));
            }
            if !section.is_zerofill() && section.size > 0 {
                let sect_file_end = (section.offset as u64)
                    .checked_add(section.size)
                    .ok_or(ParseError::Overflow { context: "section file range" })?;
                if sect_file_end > image_len {
                    return Err(ParseError::invalid_structure(
                        "section",
                        section.offset as u64,
                        format!("{} file range past image end", section.full_name()),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Returns true if `addr` falls inside this segment's VM range.
    pub fn contains_address(&self, addr: u64) -> bool {
        addr >= self.vmaddr && addr - self.vmaddr < self.vmsize
    }

    /// Returns true if `offset` falls inside this segment's file range.
    pub fn contains_file_offset(&self, offset: u64) -> bool {
        offset >= self.fileoff && offset - self.fileoff < self.filesize
    }

    /// Get a section of this segment by name.
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.sectname == name)
    }

    /// Returns true if this segment is executable.
    pub fn is_executable(&self) -> bool {
        self.initprot & VM_PROT_EXECUTE != 0
    }

    /// Returns true if this segment is writable.
    pub fn is_writable(&self) -> bool {
        self.initprot & VM_PROT_WRITE != 0
    }

    /// Returns true if this segment is readable.
    pub fn is_readable(&self) -> bool {
        self.initprot & VM_PROT_READ != 0
    }

    /// Returns true if the segment carries the legacy protected (encrypted) flag.
    pub fn is_protected(&self) -> bool {
        self.flags & SG_PROTECTED_VERSION_1 != 0
    }
}

/// A Mach-O section.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Section {
    /// Section name (up to 16 characters).
    pub sectname: String,
    /// Segment name this section belongs to.
    pub segname: String,
    /// Virtual memory address.
    pub addr: u64,
    /// Size in bytes.
    pub size: u64,
    /// File offset.
    pub offset: u32,
    /// Alignment (power of 2).
    pub align: u32,
    /// File offset of relocations.
    pub reloff: u32,
    /// Number of relocations.
    pub nreloc: u32,
    /// Flags.
    pub flags: u32,
    /// Reserved fields.
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl Section {
    /// Parse a 32-bit section header at `at` within a segment command.
    pub fn parse_32(cmd: &ByteReader<'_>, at: u64) -> Result<Self, ParseError> {
        Ok(Self {
            sectname: parse_name(cmd.read_bytes(at, 16)?),
            segname: parse_name(cmd.read_bytes(at + 16, 16)?),
            addr: cmd.read_u32(at + 32)? as u64,
            size: cmd.read_u32(at + 36)? as u64,
            offset: cmd.read_u32(at + 40)?,
            align: cmd.read_u32(at + 44)?,
            reloff: cmd.read_u32(at + 48)?,
            nreloc: cmd.read_u32(at + 52)?,
            flags: cmd.read_u32(at + 56)?,
            reserved1: cmd.read_u32(at + 60)?,
            reserved2: cmd.read_u32(at + 64)?,
            reserved3: 0,
        })
    }

    /// Parse a 64-bit section header at `at` within a segment command.
    pub fn parse_64(cmd: &ByteReader<'_>, at: u64) -> Result<Self, ParseError> {
        Ok(Self {
            sectname: parse_name(cmd.read_bytes(at, 16)?),
            segname: parse_name(cmd.read_bytes(at + 16, 16)?),
            addr: cmd.read_u64(at + 32)?,
            size: cmd.read_u64(at + 40)?,
            offset: cmd.read_u32(at + 48)?,
            align: cmd.read_u32(at + 52)?,
            reloff: cmd.read_u32(at + 56)?,
            nreloc: cmd.read_u32(at + 60)?,
            flags: cmd.read_u32(at + 64)?,
            reserved1: cmd.read_u32(at + 68)?,
            reserved2: cmd.read_u32(at + 72)?,
            reserved3: cmd.read_u32(at + 76)?,
        })
    }

    /// Returns the full section name (segment.section).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.segname, self.sectname)
    }

    /// Returns true if the section occupies no file space.
    pub fn is_zerofill(&self) -> bool {
        matches!(
            self.flags & SECTION_TYPE,
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    /// Returns true if this section contains executable code.
    pub fn is_executable(&self) -> bool {
        self.flags & S_ATTR_PURE_INSTRUCTIONS != 0 || self.flags & S_ATTR_SOME_INSTRUCTIONS != 0
    }

    /// Returns the section bytes from the slice, if the section is backed by file data.
    pub fn data<'a>(&self, image: &ByteReader<'a>) -> Result<&'a [u8], ParseError> {
        if self.is_zerofill() {
            return Ok(&[]);
        }
        image.read_bytes(self.offset as u64, self.size)
    }
}

/// Parse a null-terminated name from a fixed-size buffer.
fn parse_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}
