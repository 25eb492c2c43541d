//! Property-based tests for the type-encoding decoder.

use proptest::prelude::*;

use objcray_types::{
    parse_method_signature, parse_type, Aggregate, BlockSignature, Field, ObjcType, ObjectType,
    Primitive, TypeParseError, TypeQualifier, MAX_NESTING_DEPTH,
};

const PRIMITIVES: &[Primitive] = &[
    Primitive::Char,
    Primitive::Int,
    Primitive::Short,
    Primitive::Long,
    Primitive::LongLong,
    Primitive::UnsignedChar,
    Primitive::UnsignedInt,
    Primitive::UnsignedShort,
    Primitive::UnsignedLong,
    Primitive::UnsignedLongLong,
    Primitive::Int128,
    Primitive::UnsignedInt128,
    Primitive::Float,
    Primitive::Double,
    Primitive::LongDouble,
    Primitive::Bool,
    Primitive::Void,
    Primitive::CString,
    Primitive::Class,
    Primitive::Selector,
];

const QUALIFIERS: &[TypeQualifier] = &[
    TypeQualifier::Const,
    TypeQualifier::In,
    TypeQualifier::Inout,
    TypeQualifier::Out,
    TypeQualifier::Bycopy,
    TypeQualifier::Byref,
    TypeQualifier::Oneway,
    TypeQualifier::Atomic,
    TypeQualifier::Complex,
];

fn identifier() -> impl Strategy<Value = String> {
    "[A-Za-z_][A-Za-z0-9_]{0,8}"
}

fn object() -> impl Strategy<Value = ObjcType> {
    (
        prop::option::of(identifier()),
        prop::collection::vec(identifier(), 0..3),
    )
        .prop_map(|(class_name, protocols)| {
            ObjcType::Object(ObjectType {
                class_name,
                protocols,
            })
        })
}

fn leaf() -> impl Strategy<Value = ObjcType> {
    prop_oneof![
        4 => prop::sample::select(PRIMITIVES).prop_map(ObjcType::Primitive),
        2 => object(),
        1 => (1u32..64).prop_map(ObjcType::Bitfield),
        1 => Just(ObjcType::Block(None)),
        // `?` only ever appears behind a pointer
        1 => Just(ObjcType::pointer(ObjcType::Primitive(Primitive::Unknown))),
    ]
}

/// True if a bitfield occurs anywhere in the tree.
fn contains_bitfield(ty: &ObjcType) -> bool {
    match ty {
        ObjcType::Bitfield(_) => true,
        ObjcType::Primitive(_) | ObjcType::Object(_) | ObjcType::Block(None) => false,
        ObjcType::Pointer(inner) => contains_bitfield(inner),
        ObjcType::Array { element, .. } => contains_bitfield(element),
        ObjcType::Qualified { inner, .. } => contains_bitfield(inner),
        ObjcType::Struct(agg) | ObjcType::Union(agg) => agg
            .fields
            .iter()
            .flatten()
            .any(|field| contains_bitfield(&field.ty)),
        ObjcType::Block(Some(sig)) => {
            contains_bitfield(&sig.return_type) || sig.arguments.iter().any(contains_bitfield)
        }
    }
}

fn qualify(qualifiers: Vec<TypeQualifier>, inner: ObjcType) -> ObjcType {
    match inner {
        ObjcType::Qualified {
            qualifiers: nested,
            inner,
        } => ObjcType::Qualified {
            qualifiers: qualifiers.into_iter().chain(nested).collect(),
            inner,
        },
        inner => ObjcType::Qualified {
            qualifiers,
            inner: Box::new(inner),
        },
    }
}

fn aggregate(inner: BoxedStrategy<ObjcType>) -> impl Strategy<Value = Aggregate> {
    let fields = prop_oneof![
        prop::collection::vec(inner.clone(), 0..4)
            .prop_map(|tys| tys.into_iter().map(Field::unnamed).collect::<Vec<_>>()),
        prop::collection::vec((identifier(), inner), 1..4).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(name, ty)| Field::named(name, ty))
                .collect::<Vec<_>>()
        }),
    ];
    (
        prop::option::of(identifier()),
        prop::option::weighted(0.8, fields),
    )
        .prop_map(|(name, fields)| Aggregate { name, fields })
}

fn objc_type() -> impl Strategy<Value = ObjcType> {
    leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(ObjcType::pointer),
            (0u64..512, inner.clone()).prop_map(|(length, element)| ObjcType::Array {
                length,
                element: Box::new(element),
            }),
            aggregate(inner.clone()).prop_map(ObjcType::Struct),
            aggregate(inner.clone()).prop_map(ObjcType::Union),
            (inner.clone(), prop::collection::vec(inner.clone(), 0..3)).prop_map(
                |(ret, arguments)| ObjcType::Block(Some(BlockSignature {
                    return_type: Box::new(ret),
                    arguments,
                }))
            ),
            (
                prop::collection::vec(prop::sample::select(QUALIFIERS), 1..3),
                inner
            )
                .prop_map(|(q, ty)| qualify(q, ty)),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Re-encoding a decoded tree and decoding again yields the same tree.
    #[test]
    fn encode_then_decode_is_identity(ty in objc_type()) {
        let encoded = ty.encode();
        let decoded = parse_type(&encoded);
        prop_assert_eq!(decoded.as_ref(), Ok(&ty), "encoding: {}", encoded);
    }

    /// Deeply nested pointers fail cleanly instead of exhausting the stack.
    #[test]
    fn deep_nesting_is_rejected(depth in 1usize..4 * MAX_NESTING_DEPTH) {
        let encoding = format!("{}i", "^".repeat(depth));
        match parse_type(&encoding) {
            Ok(ty) => {
                prop_assert!(depth < MAX_NESTING_DEPTH);
                prop_assert_eq!(ty.encode(), encoding);
            }
            Err(err) => {
                prop_assert!(depth >= MAX_NESTING_DEPTH);
                prop_assert_eq!(err, TypeParseError::TooDeep { offset: MAX_NESTING_DEPTH });
            }
        }
    }

    /// The decoder never panics on arbitrary text.
    #[test]
    fn decode_never_panics(input in "\\PC{0,48}") {
        let _ = parse_type(&input);
        let _ = parse_method_signature(&input);
    }

    /// Error offsets always point inside (or just past) the input.
    #[test]
    fn error_offset_within_input(input in "[\\^\\[\\]{}()=\"@?<>bcilqrN0-9]{0,24}") {
        if let Err(err) = parse_type(&input) {
            prop_assert!(err.offset() <= input.len());
        }
    }

    /// Method signatures keep argument order and count.
    #[test]
    fn method_signature_argument_count(
        args in prop::collection::vec(
            objc_type().prop_filter("bitfield width would absorb the offset", |ty| {
                !contains_bitfield(ty)
            }),
            0..5,
        )
    ) {
        let mut encoding = String::from("v");
        for (i, arg) in args.iter().enumerate() {
            encoding.push_str(&arg.encode());
            encoding.push_str(&(i * 8).to_string());
        }
        let sig = parse_method_signature(&encoding).unwrap();
        prop_assert_eq!(sig.arguments.len(), args.len());
        for (decoded, original) in sig.argument_types().zip(&args) {
            prop_assert_eq!(decoded, original);
        }
    }
}
