//! Method signature encodings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::{ParseResult, TypeParser};
use crate::types::ObjcType;

/// A decoded method type string such as `v24@0:8@16`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub return_type: ObjcType,
    /// Total argument frame size, when the encoding carries one.
    pub frame_size: Option<u64>,
    /// Arguments in order, starting with `self` and `_cmd`.
    pub arguments: Vec<MethodArgument>,
}

/// One argument and its stack offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodArgument {
    #[serde(rename = "type")]
    pub ty: ObjcType,
    pub offset: Option<i64>,
}

impl MethodSignature {
    /// Argument types with offsets dropped.
    pub fn argument_types(&self) -> impl Iterator<Item = &ObjcType> {
        self.arguments.iter().map(|a| &a.ty)
    }

    /// Arguments after the implicit `self` and `_cmd`.
    pub fn explicit_arguments(&self) -> &[MethodArgument] {
        self.arguments.get(2..).unwrap_or(&[])
    }

    /// Compares return and argument types, ignoring frame layout.
    pub fn same_types(&self, other: &MethodSignature) -> bool {
        self.return_type == other.return_type
            && self.arguments.len() == other.arguments.len()
            && self.argument_types().eq(other.argument_types())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.return_type)?;
        let args: Vec<String> = self
            .explicit_arguments()
            .iter()
            .map(|a| a.ty.to_string())
            .collect();
        if !args.is_empty() {
            write!(f, " ({})", args.join(", "))?;
        }
        Ok(())
    }
}

/// Decodes a method type encoding.
pub fn parse_method_signature(encoding: &str) -> ParseResult<MethodSignature> {
    TypeParser::new(encoding).parse_method_signature()
}
