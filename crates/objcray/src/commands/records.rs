//! Class, category and protocol listings.

use anyhow::Result;
use objcray_objc::{ClassReference, ObjcIvar, ObjcMetadata, ObjcMethod, ObjcProperty};

use super::{print_json, Output};

fn reference(class: &ClassReference) -> String {
    match class {
        ClassReference::None => "-".to_string(),
        ClassReference::Local { name, .. } => name.clone(),
        ClassReference::External { name, library: Some(lib) } => {
            let short = lib.rsplit('/').next().unwrap_or(lib);
            format!("{} ({})", name, short)
        }
        ClassReference::External { name, library: None } => name.clone(),
        ClassReference::Dangling { address } => format!("<dangling {:#x}>", address),
    }
}

fn print_methods(prefix: char, methods: &[ObjcMethod]) {
    for m in methods {
        match &m.signature {
            Some(sig) => println!("    {} {}  {}", prefix, m.name, sig),
            None => println!("    {} {}  {}", prefix, m.name, m.type_encoding),
        }
    }
}

fn print_ivars(ivars: &[ObjcIvar]) {
    for ivar in ivars {
        let offset = ivar
            .offset
            .map_or_else(|| "?".to_string(), |o| format!("+{}", o));
        let ty = ivar
            .ty
            .as_ref()
            .map_or_else(|| ivar.type_encoding.clone(), |t| t.to_string());
        println!("    {:>6}  {} {}", offset, ty, ivar.name);
    }
}

fn print_properties(keyword: &str, properties: &[ObjcProperty]) {
    for p in properties {
        match &p.decoded {
            Some(attrs) => {
                let keywords = attrs.keywords();
                let ty = attrs
                    .ty
                    .as_ref()
                    .map_or_else(|| "?".to_string(), |t| t.to_string());
                if keywords.is_empty() {
                    println!("    {} {} {}", keyword, ty, p.name);
                } else {
                    println!("    {} ({}) {} {}", keyword, keywords.join(", "), ty, p.name);
                }
            }
            None => println!("    {} {}  {}", keyword, p.name, p.attributes),
        }
    }
}

fn print_adopted(protocols: &[String]) {
    if !protocols.is_empty() {
        println!("    <{}>", protocols.join(", "));
    }
}

/// Handle the `classes` command.
pub fn classes(metadata: &ObjcMetadata, output: Output) -> Result<()> {
    if output == Output::Json {
        return print_json(&metadata.classes);
    }

    for class in &metadata.classes {
        let mut tags = Vec::new();
        if class.is_root {
            tags.push("root");
        }
        if class.is_swift {
            tags.push("swift");
        }
        if class.partial {
            tags.push("partial");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", tags.join(" "))
        };
        println!(
            "{:#x}  {} : {}{}",
            class.address,
            class.name,
            reference(&class.superclass),
            tags
        );
        print_adopted(&class.protocols);
        print_ivars(&class.ivars);
        print_properties("@property", &class.properties);
        print_properties("@property (class)", &class.class_properties);
        print_methods('+', &class.class_methods);
        print_methods('-', &class.instance_methods);
    }
    println!("{} classes", metadata.classes.len());
    Ok(())
}

/// Handle the `categories` command.
pub fn categories(metadata: &ObjcMetadata, output: Output) -> Result<()> {
    if output == Output::Json {
        return print_json(&metadata.categories);
    }

    for cat in &metadata.categories {
        let partial = if cat.partial { "  [partial]" } else { "" };
        println!(
            "{:#x}  {} ({}){}",
            cat.address,
            reference(&cat.class),
            cat.name,
            partial
        );
        print_adopted(&cat.protocols);
        print_properties("@property", &cat.properties);
        print_properties("@property (class)", &cat.class_properties);
        print_methods('+', &cat.class_methods);
        print_methods('-', &cat.instance_methods);
    }
    println!("{} categories", metadata.categories.len());
    Ok(())
}

/// Handle the `protocols` command.
pub fn protocols(metadata: &ObjcMetadata, output: Output) -> Result<()> {
    if output == Output::Json {
        return print_json(&metadata.protocols);
    }

    for proto in &metadata.protocols {
        let partial = if proto.partial { "  [partial]" } else { "" };
        println!("{:#x}  @protocol {}{}", proto.address, proto.name, partial);
        print_adopted(&proto.protocols);
        print_properties("@property", &proto.properties);
        print_properties("@property (class)", &proto.class_properties);
        print_methods('+', &proto.class_methods);
        print_methods('-', &proto.instance_methods);
        if !proto.optional_class_methods.is_empty() || !proto.optional_instance_methods.is_empty() {
            println!("    @optional");
            print_methods('+', &proto.optional_class_methods);
            print_methods('-', &proto.optional_instance_methods);
        }
    }
    println!("{} protocols", metadata.protocols.len());
    Ok(())
}

/// Handle the `warnings` command.
pub fn warnings(metadata: &ObjcMetadata, output: Output) -> Result<()> {
    if output == Output::Json {
        return print_json(&metadata.warnings);
    }

    for warning in &metadata.warnings {
        println!("{:<20} {}", format!("{:?}", warning.kind), warning);
    }
    println!(
        "{} warnings ({} type decodes cached, {} reused)",
        metadata.warnings.len(),
        metadata.cache.misses,
        metadata.cache.hits
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_rendering() {
        assert_eq!(reference(&ClassReference::None), "-");
        assert_eq!(
            reference(&ClassReference::External {
                name: "NSObject".to_string(),
                library: Some("/usr/lib/libobjc.A.dylib".to_string()),
            }),
            "NSObject (libobjc.A.dylib)"
        );
        assert_eq!(
            reference(&ClassReference::Dangling { address: 0x1000 }),
            "<dangling 0x1000>"
        );
    }
}
