// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Derivation of content ids.
//!
//! Each id is the first 16 bytes of a SHA-256 digest over a kind tag followed
//! by the identity fields. Integers are little-endian, strings and sequences
//! are length-prefixed, so no two distinct records share an encoding.

use super::*;
use sha2::{Digest, Sha256};

const MAPPING_TAG: u8 = 1;
const FUNCTION_TAG: u8 = 2;
const LOCATION_TAG: u8 = 3;
const STACKTRACE_TAG: u8 = 4;

struct KeyHasher(Sha256);

impl KeyHasher {
    fn new(tag: u8) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([tag]);
        Self(hasher)
    }

    fn u64(&mut self, value: u64) -> &mut Self {
        self.0.update(value.to_le_bytes());
        self
    }

    fn i64(&mut self, value: i64) -> &mut Self {
        self.0.update(value.to_le_bytes());
        self
    }

    fn len(&mut self, len: usize) -> &mut Self {
        self.u64(len as u64)
    }

    fn str(&mut self, value: &str) -> &mut Self {
        self.len(value.len());
        self.0.update(value.as_bytes());
        self
    }

    fn id(&mut self, id: ContentId) -> &mut Self {
        self.0.update(id.as_bytes());
        self
    }

    fn finish(self) -> ContentId {
        let digest = self.0.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        ContentId::from_bytes(bytes)
    }
}

pub fn mapping_key(mapping: &Mapping) -> MappingId {
    let mut hasher = KeyHasher::new(MAPPING_TAG);
    hasher
        .u64(mapping.memory_start)
        .u64(mapping.memory_limit)
        .u64(mapping.file_offset)
        .str(&mapping.filename)
        .str(&mapping.build_id);
    MappingId(hasher.finish())
}

pub fn function_key(function: &Function) -> FunctionId {
    let mut hasher = KeyHasher::new(FUNCTION_TAG);
    hasher
        .str(&function.name)
        .str(&function.system_name)
        .str(&function.filename)
        .i64(function.start_line);
    FunctionId(hasher.finish())
}

pub fn location_key(location: &LocationRecord) -> LocationId {
    let mut hasher = KeyHasher::new(LOCATION_TAG);
    // Unmapped locations hash the all-zero id.
    let mapping = location.mapping_id.map(ContentId::from).unwrap_or_default();
    hasher.u64(location.address).id(mapping).len(location.lines.len());
    for line in &location.lines {
        hasher.id(line.function_id.0).i64(line.line);
    }
    LocationId(hasher.finish())
}

pub fn stacktrace_key(location_ids: &[LocationId]) -> StacktraceId {
    let mut hasher = KeyHasher::new(STACKTRACE_TAG);
    hasher.len(location_ids.len());
    for id in location_ids {
        hasher.id(id.0);
    }
    StacktraceId(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str) -> Function {
        Function {
            name: name.into(),
            system_name: name.into(),
            filename: "main.go".into(),
            start_line: 10,
        }
    }

    #[test]
    fn keys_depend_on_every_field() {
        let base = function("main");
        let mut other = base.clone();
        other.start_line = 11;
        assert_eq!(function_key(&base), function_key(&base.clone()));
        assert_ne!(function_key(&base), function_key(&other));

        // Length prefixes keep adjacent strings from bleeding into each other.
        let a = Function {
            name: "ab".into(),
            system_name: "c".into(),
            ..Default::default()
        };
        let b = Function {
            name: "a".into(),
            system_name: "bc".into(),
            ..Default::default()
        };
        assert_ne!(function_key(&a), function_key(&b));
    }

    #[test]
    fn kinds_never_collide() {
        let mapping = Mapping::default();
        let location = LocationRecord {
            address: 0,
            mapping_id: None,
            lines: vec![],
        };
        assert_ne!(mapping_key(&mapping).0, location_key(&location).0);
        assert_ne!(stacktrace_key(&[]).0, function_key(&Function::default()).0);
    }

    #[test]
    fn stacktrace_order_matters() {
        let a = location_key(&LocationRecord {
            address: 1,
            mapping_id: None,
            lines: vec![],
        });
        let b = location_key(&LocationRecord {
            address: 2,
            mapping_id: None,
            lines: vec![],
        });
        assert_eq!(stacktrace_key(&[a, b]), stacktrace_key(&[a, b]));
        assert_ne!(stacktrace_key(&[a, b]), stacktrace_key(&[b, a]));
    }

    #[test]
    fn display_is_hex() {
        let id = ContentId::from_bytes([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
    }
}
