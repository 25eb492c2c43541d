//! Objective-C encoded type representation.
//!
//! This module defines the tree produced by decoding a runtime type
//! encoding, and its inverse: [`ObjcType::encode`] turns a tree back into
//! the compact string form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded Objective-C type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjcType {
    /// Scalar, string, selector, class or void
    Primitive(Primitive),

    /// `^T`
    Pointer(Box<ObjcType>),

    /// `[N T]`
    Array { length: u64, element: Box<ObjcType> },

    /// `{name=fields}`
    Struct(Aggregate),

    /// `(name=fields)`
    Union(Aggregate),

    /// `bN`
    Bitfield(u32),

    /// `@` or `@"Class<Proto>"`
    Object(ObjectType),

    /// `@?`, optionally with an extended signature `@?<...>`
    Block(Option<BlockSignature>),

    /// One or more qualifiers applied to a type, in source order
    Qualified {
        qualifiers: Vec<TypeQualifier>,
        inner: Box<ObjcType>,
    },
}

/// Single-character scalar codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Char,
    Int,
    Short,
    Long,
    LongLong,
    UnsignedChar,
    UnsignedInt,
    UnsignedShort,
    UnsignedLong,
    UnsignedLongLong,
    Int128,
    UnsignedInt128,
    Float,
    Double,
    LongDouble,
    Bool,
    Void,
    /// `*`, a C string
    CString,
    /// `#`
    Class,
    /// `:`
    Selector,
    /// `?`, used for function pointers and unknown types
    Unknown,
}

impl Primitive {
    /// Maps an encoding character to a primitive.
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'c' => Self::Char,
            'i' => Self::Int,
            's' => Self::Short,
            'l' => Self::Long,
            'q' => Self::LongLong,
            'C' => Self::UnsignedChar,
            'I' => Self::UnsignedInt,
            'S' => Self::UnsignedShort,
            'L' => Self::UnsignedLong,
            'Q' => Self::UnsignedLongLong,
            't' => Self::Int128,
            'T' => Self::UnsignedInt128,
            'f' => Self::Float,
            'd' => Self::Double,
            'D' => Self::LongDouble,
            'B' => Self::Bool,
            'v' => Self::Void,
            '*' => Self::CString,
            '#' => Self::Class,
            ':' => Self::Selector,
            '?' => Self::Unknown,
            _ => return None,
        })
    }

    /// The encoding character.
    pub fn code(self) -> char {
        match self {
            Self::Char => 'c',
            Self::Int => 'i',
            Self::Short => 's',
            Self::Long => 'l',
            Self::LongLong => 'q',
            Self::UnsignedChar => 'C',
            Self::UnsignedInt => 'I',
            Self::UnsignedShort => 'S',
            Self::UnsignedLong => 'L',
            Self::UnsignedLongLong => 'Q',
            Self::Int128 => 't',
            Self::UnsignedInt128 => 'T',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::LongDouble => 'D',
            Self::Bool => 'B',
            Self::Void => 'v',
            Self::CString => '*',
            Self::Class => '#',
            Self::Selector => ':',
            Self::Unknown => '?',
        }
    }

    /// C spelling of the type.
    pub fn c_name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Int => "int",
            Self::Short => "short",
            Self::Long => "long",
            Self::LongLong => "long long",
            Self::UnsignedChar => "unsigned char",
            Self::UnsignedInt => "unsigned int",
            Self::UnsignedShort => "unsigned short",
            Self::UnsignedLong => "unsigned long",
            Self::UnsignedLongLong => "unsigned long long",
            Self::Int128 => "__int128",
            Self::UnsignedInt128 => "unsigned __int128",
            Self::Float => "float",
            Self::Double => "double",
            Self::LongDouble => "long double",
            Self::Bool => "_Bool",
            Self::Void => "void",
            Self::CString => "char *",
            Self::Class => "Class",
            Self::Selector => "SEL",
            Self::Unknown => "?",
        }
    }
}

/// Type qualifiers that prefix an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeQualifier {
    /// `r`
    Const,
    /// `n`
    In,
    /// `N`
    Inout,
    /// `o`
    Out,
    /// `O`
    Bycopy,
    /// `R`
    Byref,
    /// `V`
    Oneway,
    /// `A`
    Atomic,
    /// `j`
    Complex,
}

impl TypeQualifier {
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'r' => Self::Const,
            'n' => Self::In,
            'N' => Self::Inout,
            'o' => Self::Out,
            'O' => Self::Bycopy,
            'R' => Self::Byref,
            'V' => Self::Oneway,
            'A' => Self::Atomic,
            'j' => Self::Complex,
            _ => return None,
        })
    }

    pub fn code(self) -> char {
        match self {
            Self::Const => 'r',
            Self::In => 'n',
            Self::Inout => 'N',
            Self::Out => 'o',
            Self::Bycopy => 'O',
            Self::Byref => 'R',
            Self::Oneway => 'V',
            Self::Atomic => 'A',
            Self::Complex => 'j',
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Const => "const",
            Self::In => "in",
            Self::Inout => "inout",
            Self::Out => "out",
            Self::Bycopy => "bycopy",
            Self::Byref => "byref",
            Self::Oneway => "oneway",
            Self::Atomic => "_Atomic",
            Self::Complex => "_Complex",
        }
    }
}

/// A struct or union.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    /// Tag name; `None` for anonymous (`?` or empty) aggregates.
    pub name: Option<String>,
    /// Members; `None` when the encoding omits the body (`{Foo}`).
    pub fields: Option<Vec<Field>>,
}

impl Aggregate {
    pub fn new(name: Option<String>, fields: Vec<Field>) -> Self {
        Self {
            name,
            fields: Some(fields),
        }
    }

    /// Returns true if the member list is known.
    pub fn is_complete(&self) -> bool {
        self.fields.is_some()
    }
}

/// A struct or union member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Member name, when the encoding carries one.
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: ObjcType,
}

impl Field {
    pub fn unnamed(ty: ObjcType) -> Self {
        Self { name: None, ty }
    }

    pub fn named(name: impl Into<String>, ty: ObjcType) -> Self {
        Self {
            name: Some(name.into()),
            ty,
        }
    }
}

/// An object reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectType {
    /// Static class, or `None` for `id`.
    pub class_name: Option<String>,
    /// Conformed protocols, in order.
    pub protocols: Vec<String>,
}

impl ObjectType {
    pub fn id() -> Self {
        Self::default()
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self {
            class_name: Some(name.into()),
            protocols: Vec::new(),
        }
    }
}

/// Extended block signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSignature {
    pub return_type: Box<ObjcType>,
    /// Arguments, including the leading block literal itself.
    pub arguments: Vec<ObjcType>,
}

impl ObjcType {
    pub fn primitive(p: Primitive) -> Self {
        Self::Primitive(p)
    }

    pub fn pointer(inner: ObjcType) -> Self {
        Self::Pointer(Box::new(inner))
    }

    pub fn id() -> Self {
        Self::Object(ObjectType::id())
    }

    /// Returns true for object, class and block references.
    pub fn is_object(&self) -> bool {
        match self {
            Self::Object(_) | Self::Block(_) | Self::Primitive(Primitive::Class) => true,
            Self::Qualified { inner, .. } => inner.is_object(),
            _ => false,
        }
    }

    /// Strips any qualifier wrapper.
    pub fn unqualified(&self) -> &ObjcType {
        match self {
            Self::Qualified { inner, .. } => inner.unqualified(),
            other => other,
        }
    }

    /// Encodes the tree back into the runtime's compact string form.
    ///
    /// Decoding the result yields the same tree, except for a bare
    /// [`Primitive::Unknown`] placed right after an `id`: the pair spells
    /// `@?`, which always decodes as a block. Compilers only emit `?`
    /// behind a pointer (`^?`), where no such clash exists.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            Self::Primitive(p) => out.push(p.code()),
            Self::Pointer(inner) => {
                out.push('^');
                inner.encode_into(out);
            }
            Self::Array { length, element } => {
                out.push('[');
                out.push_str(&length.to_string());
                element.encode_into(out);
                out.push(']');
            }
            Self::Struct(agg) => encode_aggregate(out, '{', '}', agg),
            Self::Union(agg) => encode_aggregate(out, '(', ')', agg),
            Self::Bitfield(width) => {
                out.push('b');
                out.push_str(&width.to_string());
            }
            Self::Object(obj) => {
                out.push('@');
                if obj.class_name.is_some() || !obj.protocols.is_empty() {
                    out.push('"');
                    if let Some(name) = &obj.class_name {
                        out.push_str(name);
                    }
                    for proto in &obj.protocols {
                        out.push('<');
                        out.push_str(proto);
                        out.push('>');
                    }
                    out.push('"');
                }
            }
            Self::Block(sig) => {
                out.push_str("@?");
                if let Some(sig) = sig {
                    out.push('<');
                    sig.return_type.encode_into(out);
                    for arg in &sig.arguments {
                        arg.encode_into(out);
                    }
                    out.push('>');
                }
            }
            Self::Qualified { qualifiers, inner } => {
                out.extend(qualifiers.iter().map(|q| q.code()));
                inner.encode_into(out);
            }
        }
    }
}

fn encode_aggregate(out: &mut String, open: char, close: char, agg: &Aggregate) {
    out.push(open);
    out.push_str(agg.name.as_deref().unwrap_or("?"));
    if let Some(fields) = &agg.fields {
        out.push('=');
        for field in fields {
            if let Some(name) = &field.name {
                out.push('"');
                out.push_str(name);
                out.push('"');
            }
            field.ty.encode_into(out);
        }
    }
    out.push(close);
}

impl fmt::Display for ObjcType {
    /// Short C-like spelling, e.g. `unsigned int`, `NSString *`, `struct CGPoint`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{}", p.c_name()),
            Self::Pointer(inner) => match inner.as_ref() {
                Self::Primitive(Primitive::Unknown) => write!(f, "void (*)(void)"),
                inner => write!(f, "{} *", inner),
            },
            Self::Array { length, element } => write!(f, "{}[{}]", element, length),
            Self::Struct(agg) => write!(f, "struct {}", agg.name.as_deref().unwrap_or("?")),
            Self::Union(agg) => write!(f, "union {}", agg.name.as_deref().unwrap_or("?")),
            Self::Bitfield(width) => write!(f, "unsigned int :{}", width),
            Self::Object(obj) => {
                let protocols = if obj.protocols.is_empty() {
                    String::new()
                } else {
                    format!("<{}>", obj.protocols.join(", "))
                };
                match &obj.class_name {
                    Some(name) => write!(f, "{}{} *", name, protocols),
                    None => write!(f, "id{}", protocols),
                }
            }
            Self::Block(_) => write!(f, "id /* block */"),
            Self::Qualified { qualifiers, inner } => {
                for q in qualifiers {
                    write!(f, "{} ", q.keyword())?;
                }
                write!(f, "{}", inner)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_codes_are_inverse() {
        for code in "cislqCISLQtTfdDBv*#:?".chars() {
            let p = Primitive::from_code(code).unwrap();
            assert_eq!(p.code(), code);
        }
        assert!(Primitive::from_code('x').is_none());
    }

    #[test]
    fn test_encode_struct() {
        let point = ObjcType::Struct(Aggregate::new(
            Some("CGPoint".to_string()),
            vec![
                Field::named("x", ObjcType::Primitive(Primitive::Double)),
                Field::named("y", ObjcType::Primitive(Primitive::Double)),
            ],
        ));
        assert_eq!(point.encode(), r#"{CGPoint="x"d"y"d}"#);

        let anon = ObjcType::Union(Aggregate::new(None, vec![Field::unnamed(ObjcType::id())]));
        assert_eq!(anon.encode(), "(?=@)");

        let opaque = ObjcType::pointer(ObjcType::Struct(Aggregate {
            name: Some("__CFString".to_string()),
            fields: None,
        }));
        assert_eq!(opaque.encode(), "^{__CFString}");
    }

    #[test]
    fn test_encode_object_and_block() {
        let obj = ObjcType::Object(ObjectType {
            class_name: Some("NSArray".to_string()),
            protocols: vec!["NSCopying".to_string()],
        });
        assert_eq!(obj.encode(), r#"@"NSArray<NSCopying>""#);

        let block = ObjcType::Block(Some(BlockSignature {
            return_type: Box::new(ObjcType::Primitive(Primitive::Void)),
            arguments: vec![ObjcType::Block(None)],
        }));
        assert_eq!(block.encode(), "@?<v@?>");
    }

    #[test]
    fn test_id_before_function_pointer_round_trips() {
        let ty = ObjcType::Struct(Aggregate::new(
            Some("S".to_string()),
            vec![
                Field::unnamed(ObjcType::id()),
                Field::unnamed(ObjcType::pointer(ObjcType::Primitive(Primitive::Unknown))),
            ],
        ));
        assert_eq!(ty.encode(), "{S=@^?}");
        assert_eq!(crate::parse_type(&ty.encode()).unwrap(), ty);

        // A bare `?` after `id` reads back as a block
        let bare = ObjcType::Struct(Aggregate::new(
            Some("S".to_string()),
            vec![
                Field::unnamed(ObjcType::id()),
                Field::unnamed(ObjcType::Primitive(Primitive::Unknown)),
            ],
        ));
        assert_eq!(
            crate::parse_type(&bare.encode()).unwrap(),
            ObjcType::Struct(Aggregate::new(
                Some("S".to_string()),
                vec![Field::unnamed(ObjcType::Block(None))],
            ))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ObjcType::Primitive(Primitive::UnsignedInt).to_string(), "unsigned int");
        assert_eq!(
            ObjcType::Object(ObjectType::class("NSString")).to_string(),
            "NSString *"
        );
        let qualified = ObjcType::Qualified {
            qualifiers: vec![TypeQualifier::Const],
            inner: Box::new(ObjcType::Primitive(Primitive::CString)),
        };
        assert_eq!(qualified.to_string(), "const char *");
        assert_eq!(qualified.encode(), "r*");
    }

    #[test]
    fn test_serde_shape() {
        let ty = ObjcType::pointer(ObjcType::Primitive(Primitive::Void));
        let json = serde_json::to_string(&ty).unwrap();
        assert_eq!(json, r#"{"pointer":{"primitive":"void"}}"#);
        let back: ObjcType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ty);
    }
}
