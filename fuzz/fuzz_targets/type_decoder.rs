#![no_main]

use libfuzzer_sys::fuzz_target;
use objcray_types::{parse_method_signature, parse_property_attributes, parse_type};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    match parse_type(input) {
        Ok(ty) => {
            // Anything that decodes must re-encode to something that decodes the same
            let encoded = ty.encode();
            assert_eq!(parse_type(&encoded).as_ref(), Ok(&ty), "{:?}", encoded);
            let _ = ty.to_string();
        }
        Err(err) => assert!(err.offset() <= input.len()),
    }

    if let Ok(sig) = parse_method_signature(input) {
        let _ = sig.to_string();
    }
    let _ = parse_property_attributes(input);
});
