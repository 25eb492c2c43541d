//! # objcray-types
//!
//! Objective-C type encodings for objcray.
//!
//! This crate provides:
//! - A structured tree for encoded types (primitives, pointers, structs,
//!   unions, arrays, bitfields, objects, blocks, qualifiers)
//! - A recursive-descent decoder and the matching encoder
//! - Method signature decoding (`v24@0:8@16`)
//! - Property attribute decoding (`T@"NSString",C,N,V_name`)
//!
//! # Example
//!
//! ```
//! use objcray_types::{parse_type, ObjcType, Primitive};
//!
//! let ty = parse_type("^{Foo=i^v}").unwrap();
//! let ObjcType::Pointer(inner) = &ty else { unreachable!() };
//! assert!(matches!(**inner, ObjcType::Struct(_)));
//! assert_eq!(ty.encode(), "^{Foo=i^v}");
//! assert_eq!(parse_type("i").unwrap(), ObjcType::Primitive(Primitive::Int));
//! ```

pub mod method;
pub mod parser;
pub mod property;
pub mod types;

pub use method::{parse_method_signature, MethodArgument, MethodSignature};
pub use parser::{
    parse_type, parse_type_prefix, ParseResult, TypeParseError, TypeParser, MAX_NESTING_DEPTH,
};
pub use property::{parse_property_attributes, Ownership, PropertyAttributes};
pub use types::*;
