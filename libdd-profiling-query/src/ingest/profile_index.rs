// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::QueryError;
use crate::labels::Label;
use crate::metastore::{Function, Mapping};
use crate::pprof;
use crate::storage::SampleKind;
use rustc_hash::FxHashMap;

/// Id-based access to the records of a decoded pprof. Anything the profile
/// references but doesn't hold is invalid input.
pub struct ProfileIndex<'pprof> {
    pub pprof: &'pprof pprof::Profile,
    functions: FxHashMap<u64, &'pprof pprof::Function>,
    locations: FxHashMap<u64, &'pprof pprof::Location>,
    mappings: FxHashMap<u64, &'pprof pprof::Mapping>,
}

impl<'pprof> ProfileIndex<'pprof> {
    pub fn new(pprof: &'pprof pprof::Profile) -> Result<Self, QueryError> {
        if pprof.string_table.first().map_or(true, |s| !s.is_empty()) {
            return Err(QueryError::invalid(
                "pprof string table must start with the empty string",
            ));
        }
        Ok(Self {
            pprof,
            functions: pprof.functions.iter().map(|f| (f.id, f)).collect(),
            locations: pprof.locations.iter().map(|l| (l.id, l)).collect(),
            mappings: pprof.mappings.iter().map(|m| (m.id, m)).collect(),
        })
    }

    pub fn get_string(&self, id: i64) -> Result<&'pprof str, QueryError> {
        usize::try_from(id)
            .ok()
            .and_then(|offset| self.pprof.string_table.get(offset))
            .map(String::as_str)
            .ok_or_else(|| QueryError::invalid(format!("pprof string {id} not found")))
    }

    pub fn get_location(&self, id: u64) -> Result<&'pprof pprof::Location, QueryError> {
        self.locations
            .get(&id)
            .copied()
            .ok_or_else(|| QueryError::invalid(format!("pprof location {id} not found")))
    }

    pub fn get_function(&self, id: u64) -> Result<Function, QueryError> {
        let function = self
            .functions
            .get(&id)
            .ok_or_else(|| QueryError::invalid(format!("pprof function {id} not found")))?;
        Ok(Function {
            name: self.get_string(function.name)?.to_owned(),
            system_name: self.get_string(function.system_name)?.to_owned(),
            filename: self.get_string(function.filename)?.to_owned(),
            start_line: function.start_line,
        })
    }

    pub fn get_mapping(&self, id: u64) -> Result<Mapping, QueryError> {
        let mapping = self
            .mappings
            .get(&id)
            .ok_or_else(|| QueryError::invalid(format!("pprof mapping {id} not found")))?;
        Ok(Mapping {
            memory_start: mapping.memory_start,
            memory_limit: mapping.memory_limit,
            file_offset: mapping.file_offset,
            filename: self.get_string(mapping.filename)?.to_owned(),
            build_id: self.get_string(mapping.build_id)?.to_owned(),
        })
    }

    /// One kind per sample type, in sample type order.
    pub fn sample_kinds(&self, name: &str, delta: bool) -> Result<Vec<SampleKind>, QueryError> {
        let (period_type, period_unit) = match self.pprof.period_type {
            Some(period_type) => (
                self.get_string(period_type.r#type)?,
                self.get_string(period_type.unit)?,
            ),
            None => ("", ""),
        };
        self.pprof
            .sample_types
            .iter()
            .map(|sample_type| {
                Ok(SampleKind {
                    name: name.to_owned(),
                    sample_type: self.get_string(sample_type.r#type)?.to_owned(),
                    sample_unit: self.get_string(sample_type.unit)?.to_owned(),
                    period_type: period_type.to_owned(),
                    period_unit: period_unit.to_owned(),
                    delta,
                })
            })
            .collect()
    }

    /// The string labels of a sample. Numeric labels don't name series and
    /// are skipped.
    pub fn sample_labels(&self, sample: &pprof::Sample) -> Result<Vec<Label>, QueryError> {
        let mut labels = Vec::with_capacity(sample.labels.len());
        for label in &sample.labels {
            if label.str == 0 || label.key == 0 {
                continue;
            }
            labels.push(Label::new(
                self.get_string(label.key)?,
                self.get_string(label.str)?,
            ));
        }
        Ok(labels)
    }
}
