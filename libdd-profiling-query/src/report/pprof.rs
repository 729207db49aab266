// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Encodes stacks back into a pprof profile.
//!
//! Single results emit each distinct stack once with its summed value. Diffs
//! emit B's stacks with their values followed by A's stacks with negated
//! values, so pprof tooling renders `B - A` natively.

use crate::collections::identifiable::{Dedup, FxIndexMap, FxIndexSet};
use crate::collections::string_table::StringTable;
use crate::error::AggregationError;
use crate::frames::{Frame, ResolvedStack, WeightedStack};
use crate::metastore::{FunctionId, LocationId, MappingId, StacktraceId};
use crate::pprof;
use crate::storage::SampleKind;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Copy, Clone, Debug, Default)]
pub struct EncodeOptions {
    pub compress: bool,
    pub time_nanos: i64,
    pub duration_nanos: i64,
}

pub struct PprofBuilder {
    strings: StringTable,
    sample_type: pprof::ValueType,
    period_type: pprof::ValueType,
    mappings: FxIndexSet<MappingId>,
    functions: FxIndexSet<FunctionId>,
    locations: FxIndexSet<LocationId>,
    profile: pprof::Profile,
}

impl PprofBuilder {
    pub fn new(kind: &SampleKind) -> Self {
        let mut strings = StringTable::new();
        let sample_type = pprof::ValueType {
            r#type: strings.intern(&kind.sample_type),
            unit: strings.intern(&kind.sample_unit),
        };
        let period_type = pprof::ValueType {
            r#type: strings.intern(&kind.period_type),
            unit: strings.intern(&kind.period_unit),
        };
        Self {
            strings,
            sample_type,
            period_type,
            mappings: FxIndexSet::default(),
            functions: FxIndexSet::default(),
            locations: FxIndexSet::default(),
            profile: pprof::Profile::default(),
        }
    }

    fn add_mapping(&mut self, frame: &Frame) -> Result<u64, AggregationError> {
        let Some(mapping) = &frame.mapping else {
            return Ok(0);
        };
        let known = self.mappings.len();
        let id = self.mappings.dedup(mapping.id)?;
        if self.mappings.len() > known {
            self.profile.mappings.push(pprof::Mapping {
                id,
                memory_start: mapping.mapping.memory_start,
                memory_limit: mapping.mapping.memory_limit,
                file_offset: mapping.mapping.file_offset,
                filename: self.strings.intern(&mapping.mapping.filename),
                build_id: self.strings.intern(&mapping.mapping.build_id),
                has_functions: !frame.lines.is_empty(),
                ..Default::default()
            });
        }
        Ok(id)
    }

    fn add_location(&mut self, frame: &Frame) -> Result<u64, AggregationError> {
        let known = self.locations.len();
        let id = self.locations.dedup(frame.location_id)?;
        if self.locations.len() == known {
            return Ok(id);
        }
        let mapping_id = self.add_mapping(frame)?;
        let mut lines = Vec::with_capacity(frame.lines.len());
        for line in &frame.lines {
            let known = self.functions.len();
            let function_id = self.functions.dedup(line.function_id)?;
            if self.functions.len() > known {
                self.profile.functions.push(pprof::Function {
                    id: function_id,
                    name: self.strings.intern(&line.function.name),
                    system_name: self.strings.intern(&line.function.system_name),
                    filename: self.strings.intern(&line.function.filename),
                    start_line: line.function.start_line,
                });
            }
            lines.push(pprof::Line {
                function_id,
                line: line.line,
            });
        }
        self.profile.locations.push(pprof::Location {
            id,
            mapping_id,
            address: frame.address,
            lines,
            is_folded: false,
        });
        Ok(id)
    }

    pub fn add(&mut self, stack: &ResolvedStack, value: i64) -> Result<(), AggregationError> {
        let location_ids = stack
            .frames
            .iter()
            .map(|frame| self.add_location(frame))
            .collect::<Result<Vec<_>, _>>()?;
        self.profile.samples.push(pprof::Sample {
            location_ids,
            values: vec![value],
            labels: vec![],
        });
        Ok(())
    }

    pub fn build(mut self, options: &EncodeOptions) -> Result<pprof::Profile, AggregationError> {
        let len = self.profile.locations.len() as u64;
        for sample in &self.profile.samples {
            // Location ids start from 1, that's why they're <= len instead of < len
            if let Some(id) = sample.location_ids.iter().find(|id| **id == 0 || **id > len) {
                return Err(AggregationError::invalid_target(format!(
                    "invalid location id {id} found during serialization, len was {len}"
                )));
            }
        }
        self.profile.sample_types = vec![self.sample_type];
        self.profile.period_type = Some(self.period_type);
        self.profile.time_nanos = options.time_nanos;
        self.profile.duration_nanos = options.duration_nanos;
        self.profile.string_table = self.strings.into_vec();
        Ok(self.profile)
    }
}

/// Sums the values of each distinct stack, keeping first-seen order.
fn sum_by_stack(
    stacks: &[WeightedStack],
) -> Result<FxIndexMap<StacktraceId, (&ResolvedStack, i64)>, AggregationError> {
    let mut summed: FxIndexMap<StacktraceId, (&ResolvedStack, i64)> = FxIndexMap::default();
    for weighted in stacks {
        let entry = summed
            .entry(weighted.stack.id)
            .or_insert((&weighted.stack, 0));
        entry.1 = entry
            .1
            .checked_add(weighted.value)
            .ok_or(AggregationError::Overflow("summing pprof sample values"))?;
    }
    Ok(summed)
}

pub fn build_single(
    stacks: &[WeightedStack],
    kind: &SampleKind,
    options: &EncodeOptions,
) -> Result<pprof::Profile, AggregationError> {
    let mut builder = PprofBuilder::new(kind);
    for (stack, value) in sum_by_stack(stacks)?.into_values() {
        builder.add(stack, value)?;
    }
    builder.build(options)
}

pub fn build_diff(
    a: &[WeightedStack],
    b: &[WeightedStack],
    kind: &SampleKind,
    options: &EncodeOptions,
) -> Result<pprof::Profile, AggregationError> {
    let mut builder = PprofBuilder::new(kind);
    for (stack, value) in sum_by_stack(b)?.into_values() {
        builder.add(stack, value)?;
    }
    for (stack, value) in sum_by_stack(a)?.into_values() {
        let negated = value
            .checked_neg()
            .ok_or(AggregationError::Overflow("negating a baseline value"))?;
        builder.add(stack, negated)?;
    }
    builder.build(options)
}

/// Serializes a profile, gzipped when asked to.
pub fn serialize(profile: &pprof::Profile, compress: bool) -> Result<Vec<u8>, AggregationError> {
    let encoded = profile.encode_to_vec();
    if !compress {
        return Ok(encoded);
    }
    let failed =
        |err: std::io::Error| AggregationError::invalid_target(format!("failed to compress pprof: {err}"));
    let mut encoder = GzEncoder::new(Vec::with_capacity(encoded.len() / 2), Compression::default());
    encoder.write_all(&encoded).map_err(failed)?;
    encoder.finish().map_err(failed)
}

pub fn encode_single(
    stacks: &[WeightedStack],
    kind: &SampleKind,
    options: &EncodeOptions,
) -> Result<Vec<u8>, AggregationError> {
    serialize(&build_single(stacks, kind, options)?, options.compress)
}

pub fn encode_diff(
    a: &[WeightedStack],
    b: &[WeightedStack],
    kind: &SampleKind,
    options: &EncodeOptions,
) -> Result<Vec<u8>, AggregationError> {
    serialize(&build_diff(a, b, kind, options)?, options.compress)
}

/// Decodes a pprof, gzipped or not.
pub fn decode(bytes: &[u8]) -> Result<pprof::Profile, AggregationError> {
    let invalid = |err: &dyn std::fmt::Display| {
        AggregationError::invalid_target(format!("failed to decode pprof: {err}"))
    };
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut decoded)
            .map_err(|err| invalid(&err))?;
        pprof::Profile::decode(decoded.as_slice()).map_err(|err| invalid(&err))
    } else {
        pprof::Profile::decode(bytes).map_err(|err| invalid(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_utils::*;
    use crate::pprof::{folded_stacks, string_table_fetch};
    use proptest::prelude::*;

    fn kind() -> SampleKind {
        SampleKind {
            name: "allocs".into(),
            sample_type: "alloc_space".into(),
            sample_unit: "bytes".into(),
            period_type: "space".into(),
            period_unit: "bytes".into(),
            delta: false,
        }
    }

    fn expected(stacks: &[WeightedStack]) -> Vec<(Vec<String>, i64)> {
        let mut summed: FxIndexMap<StacktraceId, (Vec<String>, i64)> = FxIndexMap::default();
        for weighted in stacks {
            let names = weighted.stack.frames.iter().rev().map(|frame| frame.name()).collect();
            summed.entry(weighted.stack.id).or_insert((names, 0)).1 += weighted.value;
        }
        let mut expected: Vec<_> = summed.into_values().collect();
        expected.sort_unstable();
        expected
    }

    #[test]
    fn single_round_trip() {
        let stacks = vec![
            weighted(&["main", "a"], 3),
            weighted(&["main", "b"], 1),
            weighted(&["main", "a"], 2),
        ];
        for compress in [true, false] {
            let options = EncodeOptions {
                compress,
                time_nanos: 1_000_000,
                duration_nanos: 0,
            };
            let bytes = encode_single(&stacks, &kind(), &options).unwrap();
            assert_eq!(bytes.starts_with(&GZIP_MAGIC), compress);
            let profile = decode(&bytes).unwrap();
            assert_eq!(profile.time_nanos, 1_000_000);
            assert_eq!(profile.sample_types.len(), 1);
            assert_eq!(string_table_fetch(&profile, profile.sample_types[0].r#type), "alloc_space");
            assert_eq!(string_table_fetch(&profile, profile.sample_types[0].unit), "bytes");
            assert_eq!(folded_stacks(&profile), expected(&stacks));
        }
    }

    #[test]
    fn diff_negates_the_baseline() {
        let a = vec![weighted(&["main", "old"], 1)];
        let b = vec![weighted(&["main", "new"], 2)];
        let profile = build_diff(&a, &b, &kind(), &EncodeOptions::default()).unwrap();
        let values: Vec<i64> = profile.samples.iter().map(|s| s.values[0]).collect();
        assert_eq!(values, [2, -1]);
        // Shared frames are emitted once.
        assert_eq!(profile.locations.len(), 3);
        assert_eq!(profile.functions.len(), 3);
    }

    #[test]
    fn garbage_does_not_decode() {
        let err = decode(&[0x1f, 0x8b, 0, 0]).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidEncodeTarget(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: if cfg!(miri) { 4 } else { 64 },
            .. ProptestConfig::default()
        })]

        #[test]
        fn proptest_round_trip(
            stacks in proptest::collection::vec(
                (proptest::collection::vec(0usize..4, 0..5), -1000i64..1000),
                0..32,
            ),
            compress in any::<bool>(),
        ) {
            const NAMES: [&str; 4] = ["main", "a", "b", "c"];
            let stacks: Vec<WeightedStack> = stacks
                .into_iter()
                .map(|(frames, value)| {
                    let names: Vec<&str> = frames.into_iter().map(|i| NAMES[i]).collect();
                    weighted(&names, value)
                })
                .collect();
            let options = EncodeOptions { compress, ..Default::default() };
            let profile = decode(&encode_single(&stacks, &kind(), &options).unwrap()).unwrap();
            prop_assert_eq!(folded_stacks(&profile), expected(&stacks));
        }
    }
}
