//! Walks the Objective-C runtime sections of one image.
//!
//! Every pointer field goes through the image's [`PointerResolver`] before
//! it is followed. Failures are recorded as [`ExtractionWarning`]s against
//! the record being read, and extraction carries on with the next record.
//!
//! [`PointerResolver`]: objcray_formats::PointerResolver

use std::collections::HashMap;

use objcray_formats::{BindTarget, MachO, ParseError, ResolvedPointer};
use objcray_types::{MethodSignature, ObjcType};
use tracing::{debug, warn};

use crate::cache::TypeCache;
use crate::image_info::ImageInfo;
use crate::layout::*;
use crate::records::*;
use crate::warning::{ExtractionWarning, WarningKind};

/// Segments that hold runtime sections, in lookup order.
pub const OBJC_SEGMENTS: &[&str] = &["__DATA_CONST", "__DATA", "__DATA_DIRTY", "__OBJC2"];

pub const SECT_CLASSLIST: &str = "__objc_classlist";
pub const SECT_CATLIST: &str = "__objc_catlist";
pub const SECT_PROTOLIST: &str = "__objc_protolist";
pub const SECT_IMAGEINFO: &str = "__objc_imageinfo";

const CLASS_SYMBOL_PREFIX: &str = "_OBJC_CLASS_$_";
const METACLASS_SYMBOL_PREFIX: &str = "_OBJC_METACLASS_$_";
const PROTOCOL_SYMBOL_PREFIX: &str = "__OBJC_PROTOCOL_$_";

/// Extraction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Added to every reported address.
    pub slide: u64,
    /// Decode type encodings; when off, only raw strings are kept.
    pub decode_types: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            slide: 0,
            decode_types: true,
        }
    }
}

/// Strips the `_OBJC_CLASS_$_` / `_OBJC_METACLASS_$_` prefix from a bound symbol.
pub fn class_name_from_symbol(symbol: &str) -> &str {
    symbol
        .strip_prefix(CLASS_SYMBOL_PREFIX)
        .or_else(|| symbol.strip_prefix(METACLASS_SYMBOL_PREFIX))
        .unwrap_or(symbol)
}

/// A pointer slot after fixup resolution.
enum Target {
    Null,
    Address(u64),
    External(BindTarget),
}

/// One extraction pass over one image.
pub struct Extractor<'m, 'a> {
    macho: &'m MachO<'a>,
    options: ExtractOptions,
    layout: Layout,
    types: TypeCache,
    warnings: Vec<ExtractionWarning>,
    class_names: HashMap<u64, Option<String>>,
    image_info: Option<ImageInfo>,
}

impl<'m, 'a> Extractor<'m, 'a> {
    pub fn new(macho: &'m MachO<'a>, options: ExtractOptions) -> Self {
        Self {
            macho,
            options,
            layout: Layout::new(macho.bitness()),
            types: TypeCache::new(),
            warnings: Vec::new(),
            class_names: HashMap::new(),
            image_info: None,
        }
    }

    /// Runs the pass and returns everything found.
    pub fn extract(mut self) -> ObjcMetadata {
        for err in self.macho.fixup_errors() {
            self.warnings.push(ExtractionWarning::new(
                WarningKind::FixupTable,
                0,
                format!("fixups ignored, pointers read raw: {}", err),
            ));
        }

        self.image_info = self.read_image_info();

        let classes: Vec<ObjcClass> = self
            .section_pointers(SECT_CLASSLIST)
            .into_iter()
            .filter_map(|addr| self.class_at(addr))
            .collect();
        let categories: Vec<ObjcCategory> = self
            .section_pointers(SECT_CATLIST)
            .into_iter()
            .filter_map(|addr| self.category_at(addr))
            .collect();
        let protocols: Vec<ObjcProtocol> = self
            .section_pointers(SECT_PROTOLIST)
            .into_iter()
            .filter_map(|addr| self.protocol_at(addr))
            .collect();

        debug!(
            classes = classes.len(),
            categories = categories.len(),
            protocols = protocols.len(),
            warnings = self.warnings.len(),
            "extracted objc metadata"
        );

        ObjcMetadata {
            flags: binary_flags(self.macho),
            image_info: self.image_info,
            classes,
            categories,
            protocols,
            warnings: self.warnings,
            cache: self.types.stats(),
        }
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    fn warn(&mut self, kind: WarningKind, address: u64, message: impl Into<String>) {
        let warning = ExtractionWarning::new(kind, self.slid(address), message);
        warn!(kind = ?warning.kind, address = warning.address, "{}", warning.message);
        self.warnings.push(warning);
    }

    fn warn_err(&mut self, address: u64, context: &str, err: &ParseError) {
        let warning = ExtractionWarning::from_parse_error(self.slid(address), context, err);
        warn!(kind = ?warning.kind, address = warning.address, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Returns true if anything but a type decode failed since `mark`.
    fn degraded_since(&self, mark: usize) -> bool {
        self.warnings[mark..]
            .iter()
            .any(|w| w.kind != WarningKind::TypeSyntax)
    }

    fn slid(&self, address: u64) -> u64 {
        address.wrapping_add(self.options.slide)
    }

    // ---------------------------------------------------------------------
    // Primitive reads
    // ---------------------------------------------------------------------

    fn read_target(&self, slot: u64) -> Result<Target, ParseError> {
        let file_offset = self.macho.vm_to_file(slot)?;
        Ok(match self.macho.resolver().resolve_at(file_offset)? {
            ResolvedPointer::Null => Target::Null,
            ResolvedPointer::Rebase(addr) => Target::Address(self.layout.strip_pointer(addr)),
            ResolvedPointer::Bind(bind) => Target::External(bind),
        })
    }

    fn read_u32(&self, addr: u64) -> Result<u32, ParseError> {
        self.macho.reader().read_u32(self.macho.vm_to_file(addr)?)
    }

    fn read_i32(&self, addr: u64) -> Result<i32, ParseError> {
        self.macho.reader().read_i32(self.macho.vm_to_file(addr)?)
    }

    fn read_word(&self, addr: u64) -> Result<u64, ParseError> {
        self.macho
            .reader()
            .read_pointer(self.macho.vm_to_file(addr)?, self.macho.bitness())
    }

    fn u32_or_warn(&mut self, addr: u64, what: &str) -> u32 {
        self.read_u32(addr).unwrap_or_else(|err| {
            self.warn_err(addr, what, &err);
            0
        })
    }

    fn in_encrypted_range(&self, addr: u64) -> bool {
        self.macho
            .vm_to_file(addr)
            .is_ok_and(|offset| self.macho.is_encrypted_offset(offset))
    }

    /// Follows a pointer slot to a mapped local address.
    fn follow(&mut self, slot: u64, what: &str) -> Option<u64> {
        match self.read_target(slot) {
            Ok(Target::Null) => None,
            Ok(Target::Address(addr)) if self.macho.is_mapped(addr) => Some(addr),
            Ok(Target::Address(addr)) => {
                self.warn(
                    WarningKind::DanglingReference,
                    slot,
                    format!("{} points to unmapped address {:#x}", what, addr),
                );
                None
            }
            Ok(Target::External(bind)) => {
                self.warn(
                    WarningKind::UnexpectedBind,
                    slot,
                    format!("{} is bound to {}", what, bind.symbol),
                );
                None
            }
            Err(err) => {
                self.warn_err(slot, what, &err);
                None
            }
        }
    }

    fn string_at(&mut self, addr: u64, what: &str) -> Option<String> {
        if self.in_encrypted_range(addr) {
            self.warn(
                WarningKind::EncryptedRegion,
                addr,
                format!("{} lies in the encrypted range", what),
            );
            return None;
        }
        match self.macho.cstring_at(addr) {
            Ok(s) => Some(s),
            Err(err) => {
                self.warn_err(addr, what, &err);
                None
            }
        }
    }

    fn follow_string(&mut self, slot: u64, what: &str) -> Option<String> {
        let addr = self.follow(slot, what)?;
        self.string_at(addr, what)
    }

    /// Reads a list header and checks that `count` entries fit in the image.
    fn list_header(
        &mut self,
        list: u64,
        min_entsize: u64,
        flags_mask: u32,
        what: &str,
    ) -> Option<(u32, u64, u64)> {
        let (entsize_and_flags, count) = match (self.read_u32(list), self.read_u32(list + 4)) {
            (Ok(e), Ok(c)) => (e, c as u64),
            (Err(err), _) | (_, Err(err)) => {
                self.warn_err(list, what, &err);
                return None;
            }
        };
        let entsize = (entsize_and_flags & !flags_mask) as u64;
        if entsize < min_entsize {
            self.warn(
                WarningKind::MalformedRecord,
                list,
                format!("{} entry size {} is below {}", what, entsize, min_entsize),
            );
            return None;
        }
        let fits = entsize
            .checked_mul(count)
            .is_some_and(|len| self.macho.bytes_at(list + 8, len).is_ok());
        if !fits {
            self.warn(
                WarningKind::OutOfBounds,
                list,
                format!("{} of {} entries runs past its segment", what, count),
            );
            return None;
        }
        Some((entsize_and_flags & flags_mask, entsize, count))
    }

    // ---------------------------------------------------------------------
    // Sections
    // ---------------------------------------------------------------------

    fn read_image_info(&mut self) -> Option<ImageInfo> {
        let section = self.macho.find_section(SECT_IMAGEINFO, OBJC_SEGMENTS)?;
        let addr = section.addr;
        match (self.read_u32(addr), self.read_u32(addr + 4)) {
            (Ok(version), Ok(flags)) => Some(ImageInfo::new(version, flags)),
            (Err(err), _) | (_, Err(err)) => {
                self.warn_err(addr, "image info", &err);
                None
            }
        }
    }

    /// Resolves every entry of a pointer-list section.
    fn section_pointers(&mut self, sectname: &str) -> Vec<u64> {
        let macho = self.macho;
        let Some(section) = macho.find_section(sectname, OBJC_SEGMENTS) else {
            return Vec::new();
        };
        let ptr = self.layout.pointer_size();
        let count = section.size / ptr;
        debug!(section = sectname, entries = count, "reading pointer list");

        let mut out = Vec::with_capacity(count as usize);
        for i in 0..count {
            let slot = section.addr + i * ptr;
            if let Some(addr) = self.follow(slot, sectname) {
                out.push(addr);
            }
        }
        out
    }

    // ---------------------------------------------------------------------
    // Classes
    // ---------------------------------------------------------------------

    fn class_at(&mut self, addr: u64) -> Option<ObjcClass> {
        if self.in_encrypted_range(addr) {
            self.warn(
                WarningKind::EncryptedRegion,
                addr,
                "class record lies in the encrypted range",
            );
            return None;
        }

        let mark = self.warnings.len();
        let l = self.layout;
        let superclass = self.class_reference(addr + l.class_superclass(), "superclass");

        let mut class = ObjcClass {
            name: format!("<class {:#x}>", self.slid(addr)),
            address: self.slid(addr),
            superclass,
            flags: 0,
            is_root: false,
            is_swift: false,
            instance_start: 0,
            instance_size: 0,
            ivars: Vec::new(),
            instance_methods: Vec::new(),
            class_methods: Vec::new(),
            protocols: Vec::new(),
            properties: Vec::new(),
            class_properties: Vec::new(),
            partial: false,
        };

        if let Some((ro, is_swift)) = self.class_ro(addr) {
            class.is_swift = is_swift;
            class.flags = self.u32_or_warn(ro + l.ro_flags(), "class flags");
            class.is_root = class.flags & RO_ROOT != 0;
            class.instance_start = self.u32_or_warn(ro + l.ro_instance_start(), "instance start");
            class.instance_size = self.u32_or_warn(ro + l.ro_instance_size(), "instance size");
            if let Some(name) = self.follow_string(ro + l.ro_name(), "class name") {
                self.class_names.insert(addr, Some(name.clone()));
                class.name = name;
            }
            class.instance_methods = self.method_list(ro + l.ro_methods(), "method list");
            class.protocols = self.protocol_names(ro + l.ro_protocols());
            class.ivars = self.ivar_list(ro + l.ro_ivars());
            class.properties = self.property_list(ro + l.ro_properties(), "property list");
        }

        if let Some(meta) = self.metaclass(addr) {
            if let Some((meta_ro, _)) = self.class_ro(meta) {
                class.class_methods =
                    self.method_list(meta_ro + l.ro_methods(), "class method list");
                class.class_properties =
                    self.property_list(meta_ro + l.ro_properties(), "class property list");
            }
        }

        class.partial = self.degraded_since(mark);
        Some(class)
    }

    /// Follows `data` to the `class_ro_t`, returning it and the Swift bit.
    fn class_ro(&mut self, class: u64) -> Option<(u64, bool)> {
        let bits = self.follow(class + self.layout.class_data(), "class data")?;
        let (ro, is_swift) = self.layout.class_data_bits(bits);
        Some((ro, is_swift))
    }

    /// Local metaclass of a class; bound metaclasses have nothing to read.
    fn metaclass(&mut self, class: u64) -> Option<u64> {
        match self.read_target(class + self.layout.class_isa()) {
            Ok(Target::Address(meta)) if self.macho.is_mapped(meta) => Some(meta),
            Ok(Target::Address(meta)) => {
                self.warn(
                    WarningKind::DanglingReference,
                    class,
                    format!("metaclass points to unmapped address {:#x}", meta),
                );
                None
            }
            Ok(_) => None,
            Err(err) => {
                self.warn_err(class, "metaclass", &err);
                None
            }
        }
    }

    fn class_name(&mut self, class: u64) -> Option<String> {
        if let Some(cached) = self.class_names.get(&class) {
            return cached.clone();
        }
        let name = self
            .class_ro(class)
            .and_then(|(ro, _)| self.follow_string(ro + self.layout.ro_name(), "class name"));
        self.class_names.insert(class, name.clone());
        name
    }

    /// Resolves a class pointer field (superclass, category target).
    fn class_reference(&mut self, slot: u64, what: &str) -> ClassReference {
        match self.read_target(slot) {
            Ok(Target::Null) => ClassReference::None,
            Ok(Target::External(bind)) => ClassReference::External {
                name: class_name_from_symbol(&bind.symbol).to_string(),
                library: self
                    .macho
                    .library_for_ordinal(bind.lib_ordinal)
                    .map(str::to_string),
            },
            Ok(Target::Address(addr)) if !self.macho.is_mapped(addr) => {
                self.warn(
                    WarningKind::DanglingReference,
                    slot,
                    format!("{} points to unmapped address {:#x}", what, addr),
                );
                ClassReference::Dangling {
                    address: self.slid(addr),
                }
            }
            Ok(Target::Address(addr)) => {
                let name = self
                    .class_name(addr)
                    .unwrap_or_else(|| format!("<class {:#x}>", self.slid(addr)));
                ClassReference::Local {
                    name,
                    address: self.slid(addr),
                }
            }
            Err(err) => {
                self.warn_err(slot, what, &err);
                ClassReference::Dangling {
                    address: self.slid(slot),
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Lists
    // ---------------------------------------------------------------------

    fn method_list(&mut self, slot: u64, what: &str) -> Vec<ObjcMethod> {
        match self.follow(slot, what) {
            Some(list) => self.methods_at(list, what),
            None => Vec::new(),
        }
    }

    fn methods_at(&mut self, list: u64, what: &str) -> Vec<ObjcMethod> {
        let Some((flags, entsize, count)) = self.list_header(list, 0, METHOD_LIST_FLAGS_MASK, what)
        else {
            return Vec::new();
        };
        let relative = flags & METHOD_LIST_RELATIVE_FLAG != 0;
        let min = if relative {
            RELATIVE_METHOD_SIZE
        } else {
            self.layout.method_size()
        };
        if entsize < min {
            self.warn(
                WarningKind::MalformedRecord,
                list,
                format!("{} entry size {} is below {}", what, entsize, min),
            );
            return Vec::new();
        }

        let direct = flags & METHOD_LIST_SELECTORS_DIRECT_FLAG != 0;
        (0..count)
            .filter_map(|i| {
                let entry = list + 8 + i * entsize;
                if relative {
                    self.relative_method(entry, direct)
                } else {
                    self.pointer_method(entry)
                }
            })
            .collect()
    }

    fn pointer_method(&mut self, entry: u64) -> Option<ObjcMethod> {
        let ptr = self.layout.pointer_size();
        let name = self.follow_string(entry, "selector")?;
        let types = self
            .follow_string(entry + ptr, "method types")
            .unwrap_or_default();
        let implementation = match self.read_target(entry + 2 * ptr) {
            Ok(Target::Address(imp)) => Some(self.slid(imp)),
            _ => None,
        };
        Some(self.method(entry, name, types, implementation))
    }

    /// Entries are three `int32_t` offsets relative to each field.
    fn relative_method(&mut self, entry: u64, selectors_direct: bool) -> Option<ObjcMethod> {
        let offsets = (
            self.read_i32(entry),
            self.read_i32(entry + 4),
            self.read_i32(entry + 8),
        );
        let (name_off, types_off, imp_off) = match offsets {
            (Ok(n), Ok(t), Ok(i)) => (n, t, i),
            (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                self.warn_err(entry, "relative method", &err);
                return None;
            }
        };

        let name_ref = entry.wrapping_add_signed(name_off as i64);
        let name = if selectors_direct {
            self.string_at(name_ref, "selector")?
        } else {
            self.follow_string(name_ref, "selector reference")?
        };
        let types = self
            .string_at((entry + 4).wrapping_add_signed(types_off as i64), "method types")
            .unwrap_or_default();
        let implementation =
            (imp_off != 0).then(|| self.slid((entry + 8).wrapping_add_signed(imp_off as i64)));

        Some(self.method(entry, name, types, implementation))
    }

    fn method(
        &mut self,
        at: u64,
        name: String,
        type_encoding: String,
        implementation: Option<u64>,
    ) -> ObjcMethod {
        let signature = self.decode_signature(at, &type_encoding);
        ObjcMethod {
            name,
            type_encoding,
            extended_type_encoding: None,
            signature,
            implementation,
        }
    }

    fn ivar_list(&mut self, slot: u64) -> Vec<ObjcIvar> {
        let Some(list) = self.follow(slot, "ivar list") else {
            return Vec::new();
        };
        let Some((_, entsize, count)) =
            self.list_header(list, self.layout.ivar_size(), 0, "ivar list")
        else {
            return Vec::new();
        };

        let ptr = self.layout.pointer_size();
        (0..count)
            .map(|i| {
                let entry = list + 8 + i * entsize;
                let offset = self
                    .follow(entry, "ivar offset")
                    .and_then(|at| match self.read_u32(at) {
                        Ok(v) => Some(v),
                        Err(err) => {
                            self.warn_err(at, "ivar offset", &err);
                            None
                        }
                    });
                let name = self
                    .follow_string(entry + ptr, "ivar name")
                    .unwrap_or_default();
                let type_encoding = self
                    .follow_string(entry + 2 * ptr, "ivar type")
                    .unwrap_or_default();
                let alignment = self.u32_or_warn(entry + 3 * ptr, "ivar alignment");
                let size = self.u32_or_warn(entry + 3 * ptr + 4, "ivar size");
                let ty = self.decode_type(entry, &type_encoding);
                ObjcIvar {
                    name,
                    type_encoding,
                    ty,
                    offset,
                    size,
                    alignment,
                }
            })
            .collect()
    }

    fn property_list(&mut self, slot: u64, what: &str) -> Vec<ObjcProperty> {
        let Some(list) = self.follow(slot, what) else {
            return Vec::new();
        };
        let Some((_, entsize, count)) =
            self.list_header(list, self.layout.property_size(), 0, what)
        else {
            return Vec::new();
        };

        let ptr = self.layout.pointer_size();
        (0..count)
            .filter_map(|i| {
                let entry = list + 8 + i * entsize;
                let name = self.follow_string(entry, "property name")?;
                let attributes = self
                    .follow_string(entry + ptr, "property attributes")
                    .unwrap_or_default();
                let decoded = self.decode_property(entry, &attributes);
                Some(ObjcProperty {
                    name,
                    attributes,
                    decoded,
                })
            })
            .collect()
    }

    /// Names of the protocols in a `protocol_list_t`.
    fn protocol_names(&mut self, slot: u64) -> Vec<String> {
        let Some(list) = self.follow(slot, "protocol list") else {
            return Vec::new();
        };
        let ptr = self.layout.pointer_size();
        let count = match self.read_word(list) {
            Ok(count) => count,
            Err(err) => {
                self.warn_err(list, "protocol list", &err);
                return Vec::new();
            }
        };
        let fits = count
            .checked_mul(ptr)
            .is_some_and(|len| self.macho.bytes_at(list + ptr, len).is_ok());
        if !fits {
            self.warn(
                WarningKind::OutOfBounds,
                list,
                format!("protocol list of {} entries runs past its segment", count),
            );
            return Vec::new();
        }

        (0..count)
            .filter_map(|i| {
                let entry = list + ptr + i * ptr;
                match self.read_target(entry) {
                    Ok(Target::Address(proto)) => {
                        self.follow_string(proto + self.layout.protocol_name(), "protocol name")
                    }
                    Ok(Target::External(bind)) => Some(
                        bind.symbol
                            .strip_prefix(PROTOCOL_SYMBOL_PREFIX)
                            .unwrap_or(&bind.symbol)
                            .to_string(),
                    ),
                    Ok(Target::Null) => None,
                    Err(err) => {
                        self.warn_err(entry, "protocol reference", &err);
                        None
                    }
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Protocols and categories
    // ---------------------------------------------------------------------

    fn protocol_at(&mut self, addr: u64) -> Option<ObjcProtocol> {
        if self.in_encrypted_range(addr) {
            self.warn(
                WarningKind::EncryptedRegion,
                addr,
                "protocol record lies in the encrypted range",
            );
            return None;
        }

        let mark = self.warnings.len();
        let l = self.layout;
        let name = self
            .follow_string(addr + l.protocol_name(), "protocol name")
            .unwrap_or_else(|| format!("<protocol {:#x}>", self.slid(addr)));

        let mut protocol = ObjcProtocol {
            name,
            address: self.slid(addr),
            protocols: self.protocol_names(addr + l.protocol_protocols()),
            instance_methods: self.method_list(
                addr + l.protocol_instance_methods(),
                "instance methods",
            ),
            class_methods: self.method_list(addr + l.protocol_class_methods(), "class methods"),
            optional_instance_methods: self.method_list(
                addr + l.protocol_optional_instance_methods(),
                "optional instance methods",
            ),
            optional_class_methods: self.method_list(
                addr + l.protocol_optional_class_methods(),
                "optional class methods",
            ),
            properties: self.property_list(addr + l.protocol_properties(), "property list"),
            class_properties: Vec::new(),
            partial: false,
        };

        let size = self.u32_or_warn(addr + l.protocol_size(), "protocol size") as u64;
        let ptr = l.pointer_size();
        if size >= l.protocol_extended_method_types() + ptr {
            if let Some(types) =
                self.follow(addr + l.protocol_extended_method_types(), "extended method types")
            {
                self.apply_extended_types(types, &mut protocol);
            }
        }
        if size >= l.protocol_class_properties() + ptr {
            protocol.class_properties =
                self.property_list(addr + l.protocol_class_properties(), "class property list");
        }

        protocol.partial = self.degraded_since(mark);
        Some(protocol)
    }

    /// Attaches the parallel array of extended encodings, which covers the
    /// four method lists in declaration order.
    fn apply_extended_types(&mut self, array: u64, protocol: &mut ObjcProtocol) {
        let ptr = self.layout.pointer_size();
        let methods = protocol
            .instance_methods
            .iter_mut()
            .chain(protocol.class_methods.iter_mut())
            .chain(protocol.optional_instance_methods.iter_mut())
            .chain(protocol.optional_class_methods.iter_mut());

        for (i, method) in methods.enumerate() {
            let slot = array + i as u64 * ptr;
            let Some(extended) = self.follow_string(slot, "extended method type") else {
                continue;
            };
            if let Some(signature) = self.decode_signature(slot, &extended) {
                method.signature = Some(signature);
            }
            method.extended_type_encoding = Some(extended);
        }
    }

    fn category_at(&mut self, addr: u64) -> Option<ObjcCategory> {
        if self.in_encrypted_range(addr) {
            self.warn(
                WarningKind::EncryptedRegion,
                addr,
                "category record lies in the encrypted range",
            );
            return None;
        }

        let mark = self.warnings.len();
        let l = self.layout;
        let name = self
            .follow_string(addr + l.category_name(), "category name")
            .unwrap_or_else(|| format!("<category {:#x}>", self.slid(addr)));

        let mut category = ObjcCategory {
            name,
            address: self.slid(addr),
            class: self.class_reference(addr + l.category_class(), "category class"),
            instance_methods: self.method_list(
                addr + l.category_instance_methods(),
                "instance methods",
            ),
            class_methods: self.method_list(addr + l.category_class_methods(), "class methods"),
            protocols: self.protocol_names(addr + l.category_protocols()),
            properties: self.property_list(addr + l.category_properties(), "property list"),
            class_properties: Vec::new(),
            partial: false,
        };

        if self
            .image_info
            .is_some_and(|info| info.has_category_class_properties())
        {
            category.class_properties =
                self.property_list(addr + l.category_class_properties(), "class property list");
        }

        category.partial = self.degraded_since(mark);
        Some(category)
    }

    // ---------------------------------------------------------------------
    // Type decoding
    // ---------------------------------------------------------------------

    fn decode_type(&mut self, at: u64, encoding: &str) -> Option<ObjcType> {
        if !self.options.decode_types || encoding.is_empty() {
            return None;
        }
        match self.types.decode_type(encoding) {
            Ok(ty) => Some(ty),
            Err(err) => {
                self.warn(
                    WarningKind::TypeSyntax,
                    at,
                    format!("type {:?}: {}", encoding, err),
                );
                None
            }
        }
    }

    fn decode_signature(&mut self, at: u64, encoding: &str) -> Option<MethodSignature> {
        if !self.options.decode_types || encoding.is_empty() {
            return None;
        }
        match self.types.decode_signature(encoding) {
            Ok(sig) => Some(sig),
            Err(err) => {
                self.warn(
                    WarningKind::TypeSyntax,
                    at,
                    format!("method type {:?}: {}", encoding, err),
                );
                None
            }
        }
    }

    fn decode_property(
        &mut self,
        at: u64,
        attributes: &str,
    ) -> Option<objcray_types::PropertyAttributes> {
        if !self.options.decode_types || attributes.is_empty() {
            return None;
        }
        match self.types.decode_property(attributes) {
            Ok(attrs) => Some(attrs),
            Err(err) => {
                self.warn(
                    WarningKind::TypeSyntax,
                    at,
                    format!("property attributes {:?}: {}", attributes, err),
                );
                None
            }
        }
    }
}

/// Per-binary flags.
pub fn binary_flags(macho: &MachO<'_>) -> BinaryFlags {
    let contains_objc_data = [SECT_IMAGEINFO, SECT_CLASSLIST, SECT_CATLIST, SECT_PROTOLIST]
        .iter()
        .any(|sect| macho.find_section(sect, OBJC_SEGMENTS).is_some());
    BinaryFlags {
        contains_objc_data,
        has_encrypted_region: macho.is_encrypted(),
        bitness: macho.bitness(),
        endianness: macho.endianness(),
        architecture: macho.architecture(),
    }
}
