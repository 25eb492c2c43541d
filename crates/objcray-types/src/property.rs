//! Property attribute strings.
//!
//! The runtime stores each `@property` as a comma-separated attribute list:
//! `T` type, `R` readonly, `C` copy, `&` retain, `W` weak, `N` nonatomic,
//! `D` dynamic, `G`/`S` custom accessors and `V` the backing ivar. The type
//! itself may contain commas (`T@"NSArray<A,B>"`), so it is decoded with
//! the prefix parser rather than split.

use serde::{Deserialize, Serialize};

use crate::parser::{parse_type_prefix, ParseResult, TypeParseError};
use crate::types::ObjcType;

/// Setter memory semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    #[default]
    Assign,
    Retain,
    Copy,
    Weak,
}

impl Ownership {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Retain => "strong",
            Self::Copy => "copy",
            Self::Weak => "weak",
        }
    }
}

/// Decoded property attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyAttributes {
    #[serde(rename = "type")]
    pub ty: Option<ObjcType>,
    pub ownership: Ownership,
    pub readonly: bool,
    pub nonatomic: bool,
    pub dynamic: bool,
    pub getter: Option<String>,
    pub setter: Option<String>,
    pub ivar: Option<String>,
    /// Attributes not listed above, kept verbatim.
    pub other: Vec<String>,
}

impl PropertyAttributes {
    /// The `@property (...)` keyword list, in declaration order.
    pub fn keywords(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.nonatomic {
            out.push("nonatomic".to_string());
        }
        if self.readonly {
            out.push("readonly".to_string());
        }
        if self.ownership != Ownership::Assign {
            out.push(self.ownership.keyword().to_string());
        }
        if let Some(getter) = &self.getter {
            out.push(format!("getter={}", getter));
        }
        if let Some(setter) = &self.setter {
            out.push(format!("setter={}", setter));
        }
        out
    }
}

/// Decodes an attribute string such as `T@"NSString",C,N,V_name`.
pub fn parse_property_attributes(attributes: &str) -> ParseResult<PropertyAttributes> {
    let mut result = PropertyAttributes::default();
    let mut rest = attributes;

    if let Some(encoding) = rest.strip_prefix('T') {
        let (ty, used) = parse_type_prefix(encoding).map_err(|e| shift(e, 1))?;
        result.ty = Some(ty);
        let after = &encoding[used..];
        rest = match (after.strip_prefix(','), after.chars().next()) {
            (Some(tail), _) => tail,
            (None, None) => after,
            (None, Some(found)) => {
                return Err(TypeParseError::UnexpectedChar {
                    offset: 1 + used,
                    found,
                });
            }
        };
    }

    for attr in rest.split(',').filter(|a| !a.is_empty()) {
        let value = || attr[1..].to_string();
        match attr.chars().next() {
            Some('R') => result.readonly = true,
            Some('C') => result.ownership = Ownership::Copy,
            Some('&') => result.ownership = Ownership::Retain,
            Some('W') => result.ownership = Ownership::Weak,
            Some('N') => result.nonatomic = true,
            Some('D') => result.dynamic = true,
            Some('G') => result.getter = Some(value()),
            Some('S') => result.setter = Some(value()),
            Some('V') => result.ivar = Some(value()),
            _ => result.other.push(attr.to_string()),
        }
    }

    Ok(result)
}

fn shift(err: TypeParseError, by: usize) -> TypeParseError {
    match err {
        TypeParseError::UnexpectedEnd { offset } => TypeParseError::UnexpectedEnd {
            offset: offset + by,
        },
        TypeParseError::UnexpectedChar { offset, found } => TypeParseError::UnexpectedChar {
            offset: offset + by,
            found,
        },
        TypeParseError::InvalidNumber { offset } => TypeParseError::InvalidNumber {
            offset: offset + by,
        },
        TypeParseError::TrailingInput { offset } => TypeParseError::TrailingInput {
            offset: offset + by,
        },
        TypeParseError::TooDeep { offset } => TypeParseError::TooDeep {
            offset: offset + by,
        },
        TypeParseError::Empty => TypeParseError::UnexpectedEnd { offset: by },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectType, Primitive};

    #[test]
    fn test_copy_nonatomic_string() {
        let attrs = parse_property_attributes(r#"T@"NSString",C,N,V_name"#).unwrap();
        assert_eq!(attrs.ty, Some(ObjcType::Object(ObjectType::class("NSString"))));
        assert_eq!(attrs.ownership, Ownership::Copy);
        assert!(attrs.nonatomic);
        assert!(!attrs.readonly);
        assert_eq!(attrs.ivar.as_deref(), Some("_name"));
        assert_eq!(attrs.keywords(), vec!["nonatomic", "copy"]);
    }

    #[test]
    fn test_type_with_commas() {
        let attrs =
            parse_property_attributes(r#"T@"NSObject<NSCopying,NSCoding>",&,R,GisReady"#).unwrap();
        let Some(ObjcType::Object(obj)) = &attrs.ty else {
            panic!("expected object type");
        };
        assert_eq!(obj.protocols, vec!["NSCopying", "NSCoding"]);
        assert_eq!(attrs.ownership, Ownership::Retain);
        assert!(attrs.readonly);
        assert_eq!(attrs.getter.as_deref(), Some("isReady"));
    }

    #[test]
    fn test_scalar_and_unknown_attributes() {
        let attrs = parse_property_attributes("Tq,N,D,P,Sset_count:").unwrap();
        assert_eq!(attrs.ty, Some(ObjcType::Primitive(Primitive::LongLong)));
        assert!(attrs.dynamic);
        assert_eq!(attrs.setter.as_deref(), Some("set_count:"));
        assert_eq!(attrs.other, vec!["P"]);
    }

    #[test]
    fn test_bad_type_offset_is_absolute() {
        let err = parse_property_attributes("T{Foo=z},N").unwrap_err();
        assert_eq!(err.offset(), 6);
        let err = parse_property_attributes("Tii,N").unwrap_err();
        assert_eq!(err.offset(), 2);
    }
}
