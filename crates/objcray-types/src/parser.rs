//! Recursive-descent decoder for Objective-C type encodings.
//!
//! Handles the runtime grammar as emitted by clang:
//! - single-character primitives (`i`, `Q`, `d`, `*`, `:`, `#`, ...)
//! - pointers (`^T`), arrays (`[N T]`), bitfields (`bN`)
//! - structs and unions, including anonymous, opaque and templated names
//!   and quoted member names
//! - objects with class and protocol names, blocks with extended signatures
//! - stacked qualifiers (`r`, `n`, `N`, `o`, `O`, `R`, `V`, `A`, `j`)
//!
//! Unknown characters fail the whole decode; nothing is skipped.

use crate::method::{MethodArgument, MethodSignature};
use crate::types::*;
use thiserror::Error;

/// Errors that can occur while decoding an encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("unexpected end of encoding at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { offset: usize, found: char },

    #[error("invalid number at offset {offset}")]
    InvalidNumber { offset: usize },

    #[error("trailing input at offset {offset}")]
    TrailingInput { offset: usize },

    #[error("encoding nested too deeply at offset {offset}")]
    TooDeep { offset: usize },

    #[error("empty encoding")]
    Empty,
}

/// Deepest type nesting the decoder accepts.
pub const MAX_NESTING_DEPTH: usize = 256;

impl TypeParseError {
    /// Byte offset into the encoding where decoding failed.
    pub fn offset(&self) -> usize {
        match self {
            Self::UnexpectedEnd { offset }
            | Self::UnexpectedChar { offset, .. }
            | Self::InvalidNumber { offset }
            | Self::TrailingInput { offset }
            | Self::TooDeep { offset } => *offset,
            Self::Empty => 0,
        }
    }
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, TypeParseError>;

/// Decoder over a single encoding string.
pub struct TypeParser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> TypeParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn expect_any(&mut self) -> ParseResult<char> {
        self.next_char()
            .ok_or(TypeParseError::UnexpectedEnd { offset: self.pos })
    }

    fn expect(&mut self, want: char) -> ParseResult<()> {
        let offset = self.pos;
        match self.next_char() {
            Some(ch) if ch == want => Ok(()),
            Some(found) => Err(TypeParseError::UnexpectedChar { offset, found }),
            None => Err(TypeParseError::UnexpectedEnd { offset }),
        }
    }

    fn unexpected(&self) -> TypeParseError {
        match self.peek_char() {
            Some(found) => TypeParseError::UnexpectedChar {
                offset: self.pos,
                found,
            },
            None => TypeParseError::UnexpectedEnd { offset: self.pos },
        }
    }

    /// Decodes one complete type; the input must be fully consumed.
    pub fn parse_complete(&mut self) -> ParseResult<ObjcType> {
        if self.input.is_empty() {
            return Err(TypeParseError::Empty);
        }
        let ty = self.parse_type()?;
        if !self.is_at_end() {
            return Err(TypeParseError::TrailingInput { offset: self.pos });
        }
        Ok(ty)
    }

    /// Decodes one type starting at the current position.
    pub fn parse_type(&mut self) -> ParseResult<ObjcType> {
        self.parse_type_in(false)
    }

    /// `named_fields` is set while decoding a member of an aggregate whose
    /// members carry quoted names.
    fn parse_type_in(&mut self, named_fields: bool) -> ParseResult<ObjcType> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(TypeParseError::TooDeep { offset: self.pos });
        }
        self.depth += 1;
        let result = self.parse_qualified(named_fields);
        self.depth -= 1;
        result
    }

    fn parse_qualified(&mut self, named_fields: bool) -> ParseResult<ObjcType> {
        let mut qualifiers = Vec::new();
        while let Some(q) = self.peek_char().and_then(TypeQualifier::from_code) {
            self.next_char();
            qualifiers.push(q);
        }

        let inner = self.parse_unqualified(named_fields)?;
        if qualifiers.is_empty() {
            Ok(inner)
        } else {
            Ok(ObjcType::Qualified {
                qualifiers,
                inner: Box::new(inner),
            })
        }
    }

    fn parse_unqualified(&mut self, named_fields: bool) -> ParseResult<ObjcType> {
        let start = self.pos;
        let ch = self.expect_any()?;

        match ch {
            '^' => Ok(ObjcType::Pointer(Box::new(self.parse_type_in(named_fields)?))),
            '[' => {
                let length = self.parse_number()?;
                let element = self.parse_type()?;
                self.expect(']')?;
                Ok(ObjcType::Array {
                    length,
                    element: Box::new(element),
                })
            }
            '{' => Ok(ObjcType::Struct(self.parse_aggregate('}')?)),
            '(' => Ok(ObjcType::Union(self.parse_aggregate(')')?)),
            'b' => {
                let offset = self.pos;
                let width = self.parse_number()?;
                let width =
                    u32::try_from(width).map_err(|_| TypeParseError::InvalidNumber { offset })?;
                Ok(ObjcType::Bitfield(width))
            }
            '@' => self.parse_object(named_fields),
            other => Primitive::from_code(other)
                .map(ObjcType::Primitive)
                .ok_or(TypeParseError::UnexpectedChar {
                    offset: start,
                    found: other,
                }),
        }
    }

    fn parse_number(&mut self) -> ParseResult<u64> {
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.next_char();
        }
        if start == self.pos {
            return Err(self.unexpected());
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| TypeParseError::InvalidNumber { offset: start })
    }

    /// Parses an optionally signed offset, as found in method signatures.
    fn parse_offset(&mut self) -> ParseResult<Option<i64>> {
        let start = self.pos;
        let negative = match self.peek_char() {
            Some('-') => {
                self.next_char();
                true
            }
            Some('+') => {
                self.next_char();
                false
            }
            _ => false,
        };
        if !matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            if self.pos != start {
                return Err(self.unexpected());
            }
            return Ok(None);
        }
        let magnitude = self.parse_number()?;
        let value =
            i64::try_from(magnitude).map_err(|_| TypeParseError::InvalidNumber { offset: start })?;
        Ok(Some(if negative { -value } else { value }))
    }

    /// Reads up to the closing quote; the opening quote is already consumed.
    fn parse_quoted(&mut self) -> ParseResult<&'a str> {
        let start = self.pos;
        loop {
            match self.next_char() {
                Some('"') => return Ok(&self.input[start..self.pos - 1]),
                Some(_) => {}
                None => return Err(TypeParseError::UnexpectedEnd { offset: self.pos }),
            }
        }
    }

    fn parse_aggregate(&mut self, close: char) -> ParseResult<Aggregate> {
        let name_start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek_char() {
                None => return Err(TypeParseError::UnexpectedEnd { offset: self.pos }),
                Some('<') => depth += 1,
                Some('>') => depth = depth.saturating_sub(1),
                Some(c) if depth == 0 && (c == '=' || c == close) => break,
                Some(_) => {}
            }
            self.next_char();
        }

        let name = match &self.input[name_start..self.pos] {
            "" | "?" => None,
            name => Some(name.to_string()),
        };

        if self.peek_char() == Some(close) {
            self.next_char();
            return Ok(Aggregate { name, fields: None });
        }
        self.expect('=')?;

        let named = self.peek_char() == Some('"');
        let mut fields = Vec::new();
        loop {
            match self.peek_char() {
                None => return Err(TypeParseError::UnexpectedEnd { offset: self.pos }),
                Some(c) if c == close => {
                    self.next_char();
                    break;
                }
                Some('"') => {
                    self.next_char();
                    let field_name = self.parse_quoted()?.to_string();
                    let ty = self.parse_type_in(named)?;
                    fields.push(Field::named(field_name, ty));
                }
                Some(_) => fields.push(Field::unnamed(self.parse_type_in(named)?)),
            }
        }

        Ok(Aggregate {
            name,
            fields: Some(fields),
        })
    }

    fn parse_object(&mut self, named_fields: bool) -> ParseResult<ObjcType> {
        match self.peek_char() {
            Some('?') => {
                self.next_char();
                if self.peek_char() != Some('<') {
                    return Ok(ObjcType::Block(None));
                }
                self.next_char();
                let return_type = self.parse_type()?;
                let mut arguments = Vec::new();
                loop {
                    match self.peek_char() {
                        Some('>') => {
                            self.next_char();
                            break;
                        }
                        None => return Err(TypeParseError::UnexpectedEnd { offset: self.pos }),
                        Some(_) => arguments.push(self.parse_type()?),
                    }
                }
                Ok(ObjcType::Block(Some(BlockSignature {
                    return_type: Box::new(return_type),
                    arguments,
                })))
            }
            Some('"') => {
                // Inside a struct with named members, `@"x"` is ambiguous: the
                // quoted text is a class name only when another member name or
                // the end of the aggregate follows it.
                if named_fields && !self.quoted_class_follows() {
                    return Ok(ObjcType::id());
                }
                self.next_char();
                let payload = self.parse_quoted()?;
                Ok(ObjcType::Object(split_class_and_protocols(payload)))
            }
            _ => Ok(ObjcType::id()),
        }
    }

    /// Looks past a quoted string at the current position without consuming it.
    fn quoted_class_follows(&self) -> bool {
        let rest = &self.input[self.pos + 1..];
        match rest.find('"') {
            Some(end) => matches!(rest[end + 1..].chars().next(), Some('"' | '}' | ')') | None),
            None => false,
        }
    }

    /// Decodes a method signature: return type, frame size, then each
    /// argument with its stack offset.
    pub fn parse_method_signature(&mut self) -> ParseResult<MethodSignature> {
        if self.input.is_empty() {
            return Err(TypeParseError::Empty);
        }
        let return_type = self.parse_type()?;
        let frame_size = match self.parse_offset()? {
            Some(size) if size < 0 => {
                return Err(TypeParseError::InvalidNumber { offset: self.pos });
            }
            size => size.map(|s| s as u64),
        };

        let mut arguments = Vec::new();
        while !self.is_at_end() {
            let ty = self.parse_type()?;
            let offset = self.parse_offset()?;
            arguments.push(MethodArgument { ty, offset });
        }

        Ok(MethodSignature {
            return_type,
            frame_size,
            arguments,
        })
    }
}

/// Splits `Class<P1><P2>` or `Class<P1, P2>` into its parts.
fn split_class_and_protocols(payload: &str) -> ObjectType {
    let (class, rest) = match payload.find('<') {
        Some(idx) => (&payload[..idx], &payload[idx..]),
        None => (payload, ""),
    };

    let protocols = rest
        .split(|c| c == '<' || c == '>' || c == ',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    ObjectType {
        class_name: (!class.is_empty()).then(|| class.to_string()),
        protocols,
    }
}

/// Decodes a complete type encoding.
pub fn parse_type(encoding: &str) -> ParseResult<ObjcType> {
    TypeParser::new(encoding).parse_complete()
}

/// Decodes the leading type of `encoding`, returning it with the number of
/// bytes consumed.
pub fn parse_type_prefix(encoding: &str) -> ParseResult<(ObjcType, usize)> {
    if encoding.is_empty() {
        return Err(TypeParseError::Empty);
    }
    let mut parser = TypeParser::new(encoding);
    let ty = parser.parse_type()?;
    Ok((ty, parser.position()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(p: Primitive) -> ObjcType {
        ObjcType::Primitive(p)
    }

    #[test]
    fn test_parse_primitives() {
        assert_eq!(parse_type("i").unwrap(), prim(Primitive::Int));
        assert_eq!(parse_type("Q").unwrap(), prim(Primitive::UnsignedLongLong));
        assert_eq!(parse_type("*").unwrap(), prim(Primitive::CString));
        assert_eq!(parse_type(":").unwrap(), prim(Primitive::Selector));
        assert_eq!(parse_type("#").unwrap(), prim(Primitive::Class));
        assert_eq!(parse_type("@").unwrap(), ObjcType::id());
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let shallow = format!("{}i{}", "{S=".repeat(16), "}".repeat(16));
        assert!(parse_type(&shallow).is_ok());

        let deep = format!("{}i{}", "{S=".repeat(100_000), "}".repeat(100_000));
        assert!(matches!(parse_type(&deep), Err(TypeParseError::TooDeep { .. })));

        let blocks = format!("{}v{}", "@?<".repeat(100_000), ">".repeat(100_000));
        assert!(matches!(parse_type(&blocks), Err(TypeParseError::TooDeep { .. })));
    }

    #[test]
    fn test_parse_point_struct() {
        let ty = parse_type("{Point=ff}").unwrap();
        let ObjcType::Struct(agg) = ty else {
            panic!("expected struct, got {:?}", ty);
        };
        assert_eq!(agg.name.as_deref(), Some("Point"));
        let fields = agg.fields.unwrap();
        assert_eq!(fields.len(), 2);
        for field in fields {
            assert_eq!(field.name, None);
            assert_eq!(field.ty, prim(Primitive::Float));
        }
    }

    #[test]
    fn test_parse_pointer_to_struct() {
        let ty = parse_type("^{Foo=i^v}").unwrap();
        let expected = ObjcType::pointer(ObjcType::Struct(Aggregate::new(
            Some("Foo".to_string()),
            vec![
                Field::unnamed(prim(Primitive::Int)),
                Field::unnamed(ObjcType::pointer(prim(Primitive::Void))),
            ],
        )));
        assert_eq!(ty, expected);
    }

    #[test]
    fn test_parse_anonymous_and_opaque() {
        let ObjcType::Union(agg) = parse_type("(?=iQ)").unwrap() else {
            panic!("expected union");
        };
        assert_eq!(agg.name, None);
        assert_eq!(agg.fields.map(|f| f.len()), Some(2));

        let ObjcType::Pointer(inner) = parse_type("^{__CFString}").unwrap() else {
            panic!("expected pointer");
        };
        assert_eq!(
            *inner,
            ObjcType::Struct(Aggregate {
                name: Some("__CFString".to_string()),
                fields: None,
            })
        );

        let ObjcType::Struct(empty) = parse_type("{=i}").unwrap() else {
            panic!("expected struct");
        };
        assert_eq!(empty.name, None);
    }

    #[test]
    fn test_parse_array_and_bitfield() {
        assert_eq!(
            parse_type("[16C]").unwrap(),
            ObjcType::Array {
                length: 16,
                element: Box::new(prim(Primitive::UnsignedChar)),
            }
        );
        let ObjcType::Struct(agg) = parse_type("{flags=b1b3b28}").unwrap() else {
            panic!("expected struct");
        };
        let widths: Vec<_> = agg
            .fields
            .unwrap()
            .into_iter()
            .map(|f| f.ty)
            .collect();
        assert_eq!(
            widths,
            vec![
                ObjcType::Bitfield(1),
                ObjcType::Bitfield(3),
                ObjcType::Bitfield(28)
            ]
        );
    }

    #[test]
    fn test_parse_qualifiers_stack() {
        let ty = parse_type("rn^v").unwrap();
        assert_eq!(
            ty,
            ObjcType::Qualified {
                qualifiers: vec![TypeQualifier::Const, TypeQualifier::In],
                inner: Box::new(ObjcType::pointer(prim(Primitive::Void))),
            }
        );
        assert!(matches!(
            parse_type("r"),
            Err(TypeParseError::UnexpectedEnd { offset: 1 })
        ));
    }

    #[test]
    fn test_parse_objects() {
        assert_eq!(
            parse_type(r#"@"NSString""#).unwrap(),
            ObjcType::Object(ObjectType::class("NSString"))
        );
        assert_eq!(
            parse_type(r#"@"NSObject<NSCopying><NSCoding>""#).unwrap(),
            ObjcType::Object(ObjectType {
                class_name: Some("NSObject".to_string()),
                protocols: vec!["NSCopying".to_string(), "NSCoding".to_string()],
            })
        );
        assert_eq!(
            parse_type(r#"@"<UITableViewDelegate, UIScrollViewDelegate>""#).unwrap(),
            ObjcType::Object(ObjectType {
                class_name: None,
                protocols: vec![
                    "UITableViewDelegate".to_string(),
                    "UIScrollViewDelegate".to_string()
                ],
            })
        );
    }

    #[test]
    fn test_parse_blocks() {
        assert_eq!(parse_type("@?").unwrap(), ObjcType::Block(None));
        let ObjcType::Block(Some(sig)) = parse_type(r#"@?<v@?@"NSError">"#).unwrap() else {
            panic!("expected block signature");
        };
        assert_eq!(*sig.return_type, prim(Primitive::Void));
        assert_eq!(
            sig.arguments,
            vec![
                ObjcType::Block(None),
                ObjcType::Object(ObjectType::class("NSError"))
            ]
        );
        assert_eq!(
            parse_type("^?").unwrap(),
            ObjcType::pointer(prim(Primitive::Unknown))
        );
    }

    #[test]
    fn test_parse_named_fields() {
        let ObjcType::Struct(agg) = parse_type(r#"{CGPoint="x"d"y"d}"#).unwrap() else {
            panic!("expected struct");
        };
        let names: Vec<_> = agg
            .fields
            .unwrap()
            .into_iter()
            .map(|f| f.name.unwrap())
            .collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_named_field_object_disambiguation() {
        // `@"NSString"` followed by another member name: class name.
        let ObjcType::Struct(agg) =
            parse_type(r#"{Box="label"@"NSString""count"i}"#).unwrap()
        else {
            panic!("expected struct");
        };
        let fields = agg.fields.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].ty, ObjcType::Object(ObjectType::class("NSString")));

        // `@` followed by the next member's name: plain id.
        let ObjcType::Struct(agg) = parse_type(r#"{Box="obj"@"count"i}"#).unwrap() else {
            panic!("expected struct");
        };
        let fields = agg.fields.unwrap();
        assert_eq!(fields[0].ty, ObjcType::id());
        assert_eq!(fields[1].name.as_deref(), Some("count"));
        assert_eq!(fields[1].ty, prim(Primitive::Int));
    }

    #[test]
    fn test_parse_templated_name() {
        let ObjcType::Struct(agg) =
            parse_type("{vector<int, std::allocator<int> >=^i^i}").unwrap()
        else {
            panic!("expected struct");
        };
        assert_eq!(
            agg.name.as_deref(),
            Some("vector<int, std::allocator<int> >")
        );
        assert_eq!(agg.fields.map(|f| f.len()), Some(2));
    }

    #[test]
    fn test_error_offsets() {
        assert_eq!(
            parse_type("{Foo=iz}"),
            Err(TypeParseError::UnexpectedChar {
                offset: 6,
                found: 'z'
            })
        );
        assert_eq!(
            parse_type("^{Foo=i"),
            Err(TypeParseError::UnexpectedEnd { offset: 7 })
        );
        assert_eq!(parse_type("ii"), Err(TypeParseError::TrailingInput { offset: 1 }));
        assert_eq!(parse_type("[i]").unwrap_err().offset(), 1);
        assert_eq!(parse_type(""), Err(TypeParseError::Empty));
        assert!(parse_type(r#"@"NSString"#).is_err());
    }

    #[test]
    fn test_prefix() {
        let (ty, used) = parse_type_prefix(r#"@"NSString",C"#).unwrap();
        assert_eq!(ty, ObjcType::Object(ObjectType::class("NSString")));
        assert_eq!(used, 11);
    }

    #[test]
    fn test_method_signature() {
        let sig = TypeParser::new("v24@0:8@16").parse_method_signature().unwrap();
        assert_eq!(sig.return_type, prim(Primitive::Void));
        assert_eq!(sig.frame_size, Some(24));
        let offsets: Vec<_> = sig.arguments.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(8), Some(16)]);
        assert_eq!(sig.arguments[1].ty, prim(Primitive::Selector));

        let bare = TypeParser::new(r#"@@:@"NSString""#)
            .parse_method_signature()
            .unwrap();
        assert_eq!(bare.frame_size, None);
        assert_eq!(bare.arguments.len(), 3);

        let signed = TypeParser::new("c12@+0:+4i-8").parse_method_signature().unwrap();
        assert_eq!(signed.arguments[2].offset, Some(-8));
    }
}
