//! Per-image memo of decoded type strings.
//!
//! Decoding is pure and keyed by the raw string, so identical encodings
//! across an image (`v16@0:8` appears thousands of times) decode once.

use std::collections::HashMap;

use objcray_types::{
    parse_method_signature, parse_property_attributes, parse_type, MethodSignature, ObjcType,
    PropertyAttributes, TypeParseError,
};
use serde::Serialize;

/// Hit and miss counters across all three caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
pub struct TypeCache {
    types: HashMap<String, Result<ObjcType, TypeParseError>>,
    signatures: HashMap<String, Result<MethodSignature, TypeParseError>>,
    properties: HashMap<String, Result<PropertyAttributes, TypeParseError>>,
    stats: CacheStats,
}

fn lookup<T: Clone>(
    map: &mut HashMap<String, Result<T, TypeParseError>>,
    stats: &mut CacheStats,
    key: &str,
    decode: impl FnOnce(&str) -> Result<T, TypeParseError>,
) -> Result<T, TypeParseError> {
    if let Some(cached) = map.get(key) {
        stats.hits += 1;
        return cached.clone();
    }
    stats.misses += 1;
    let decoded = decode(key);
    map.insert(key.to_string(), decoded.clone());
    decoded
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an ivar or field type.
    pub fn decode_type(&mut self, encoding: &str) -> Result<ObjcType, TypeParseError> {
        lookup(&mut self.types, &mut self.stats, encoding, parse_type)
    }

    /// Decodes a method type string.
    pub fn decode_signature(&mut self, encoding: &str) -> Result<MethodSignature, TypeParseError> {
        lookup(
            &mut self.signatures,
            &mut self.stats,
            encoding,
            parse_method_signature,
        )
    }

    /// Decodes a property attribute string.
    pub fn decode_property(
        &mut self,
        attributes: &str,
    ) -> Result<PropertyAttributes, TypeParseError> {
        lookup(
            &mut self.properties,
            &mut self.stats,
            attributes,
            parse_property_attributes,
        )
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of distinct strings seen.
    pub fn len(&self) -> usize {
        self.types.len() + self.signatures.len() + self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
