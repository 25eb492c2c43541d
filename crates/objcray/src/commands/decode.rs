//! Standalone decoding of encoded type strings.

use anyhow::{Context, Result};
use objcray_types::{parse_method_signature, parse_property_attributes, parse_type};

use super::{print_json, Output};

/// What kind of string is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Type,
    Method,
    Property,
}

/// Handle the `decode` command.
pub fn decode(encoding: &str, mode: DecodeMode, output: Output) -> Result<()> {
    let failed = || format!("Failed to decode '{}'", encoding);

    match mode {
        DecodeMode::Type => {
            let ty = parse_type(encoding).with_context(failed)?;
            match output {
                Output::Json => print_json(&ty)?,
                Output::Text => {
                    println!("{}", ty);
                    println!("encoding: {}", ty.encode());
                }
            }
        }
        DecodeMode::Method => {
            let sig = parse_method_signature(encoding).with_context(failed)?;
            match output {
                Output::Json => print_json(&sig)?,
                Output::Text => {
                    println!("returns:    {}", sig.return_type);
                    if let Some(frame) = sig.frame_size {
                        println!("frame size: {}", frame);
                    }
                    for (i, arg) in sig.arguments.iter().enumerate() {
                        match arg.offset {
                            Some(offset) => println!("arg {:<2} @{:<4} {}", i, offset, arg.ty),
                            None => println!("arg {:<2}       {}", i, arg.ty),
                        }
                    }
                }
            }
        }
        DecodeMode::Property => {
            let attrs = parse_property_attributes(encoding).with_context(failed)?;
            match output {
                Output::Json => print_json(&attrs)?,
                Output::Text => {
                    let ty = attrs
                        .ty
                        .as_ref()
                        .map_or_else(|| "?".to_string(), |t| t.to_string());
                    println!("type:       {}", ty);
                    println!("attributes: {}", attrs.keywords().join(", "));
                    if let Some(ivar) = &attrs.ivar {
                        println!("ivar:       {}", ivar);
                    }
                    if attrs.dynamic {
                        println!("dynamic");
                    }
                }
            }
        }
    }

    Ok(())
}
