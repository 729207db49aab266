// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use libdd_profiling_query::labels::LabelSet;
use libdd_profiling_query::metastore::InMemoryMetastore;
use libdd_profiling_query::pprof;
use libdd_profiling_query::query::QueryService;
use libdd_profiling_query::storage::InMemoryStorage;
use libdd_profiling_query::{QueryConfig, RequestContext};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Harness {
    pub metastore: Arc<InMemoryMetastore>,
    pub storage: Arc<InMemoryStorage>,
    pub service: QueryService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    pub fn with_config(config: QueryConfig) -> Self {
        let metastore = Arc::new(InMemoryMetastore::new());
        let storage = Arc::new(InMemoryStorage::new());
        let service = QueryService::new(config, metastore.clone(), storage.clone());
        Self {
            metastore,
            storage,
            service,
        }
    }

    /// Ingests `profile` under `labels` at `timestamp`, returning the number
    /// of rows written.
    pub async fn ingest(&self, labels: &LabelSet, profile: &pprof::Profile, timestamp: i64) -> usize {
        self.service
            .ingester()
            .ingest(&RequestContext::background(), labels, profile, false, Some(timestamp))
            .await
            .unwrap()
    }

    /// Calls made to either collaborator so far.
    pub fn io_calls(&self) -> usize {
        self.metastore.calls() + self.storage.calls()
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    LabelSet::from_pairs(pairs.iter().copied()).unwrap()
}

/// Builds pprof profiles with a single sample type. Frames are given root
/// first as `(function, address)`.
pub struct ProfileFixture {
    profile: pprof::Profile,
    strings: HashMap<String, i64>,
    functions: HashMap<String, u64>,
    locations: HashMap<(String, u64), u64>,
}

impl ProfileFixture {
    pub fn new(sample_type: &str, sample_unit: &str) -> Self {
        let mut fixture = Self {
            profile: pprof::Profile::default(),
            strings: HashMap::new(),
            functions: HashMap::new(),
            locations: HashMap::new(),
        };
        fixture.intern("");
        let sample_type = pprof::ValueType {
            r#type: fixture.intern(sample_type),
            unit: fixture.intern(sample_unit),
        };
        fixture.profile.sample_types.push(sample_type);
        fixture
    }

    pub fn period(mut self, period_type: &str, period_unit: &str) -> Self {
        self.profile.period_type = Some(pprof::ValueType {
            r#type: self.intern(period_type),
            unit: self.intern(period_unit),
        });
        self
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(id) = self.strings.get(s) {
            return *id;
        }
        let id = self.profile.string_table.len() as i64;
        self.profile.string_table.push(s.to_string());
        self.strings.insert(s.to_string(), id);
        id
    }

    fn function(&mut self, name: &str) -> u64 {
        if let Some(id) = self.functions.get(name) {
            return *id;
        }
        let id = self.profile.functions.len() as u64 + 1;
        let function = pprof::Function {
            id,
            name: self.intern(name),
            system_name: self.intern(name),
            filename: self.intern(&format!("{name}.go")),
            start_line: 1,
        };
        self.profile.functions.push(function);
        self.functions.insert(name.to_string(), id);
        id
    }

    fn location(&mut self, name: &str, address: u64) -> u64 {
        let key = (name.to_string(), address);
        if let Some(id) = self.locations.get(&key) {
            return *id;
        }
        let function_id = self.function(name);
        let id = self.profile.locations.len() as u64 + 1;
        self.profile.locations.push(pprof::Location {
            id,
            mapping_id: 0,
            address,
            lines: vec![pprof::Line {
                function_id,
                line: 1,
            }],
            is_folded: false,
        });
        self.locations.insert(key, id);
        id
    }

    pub fn sample(self, frames: &[(&str, u64)], value: i64) -> Self {
        self.sample_with_labels(frames, value, &[])
    }

    pub fn sample_with_labels(
        mut self,
        frames: &[(&str, u64)],
        value: i64,
        labels: &[(&str, &str)],
    ) -> Self {
        let location_ids = frames
            .iter()
            .rev()
            .map(|(name, address)| self.location(name, *address))
            .collect();
        let labels = labels
            .iter()
            .map(|(key, value)| pprof::Label {
                key: self.intern(key),
                str: self.intern(value),
                ..Default::default()
            })
            .collect();
        self.profile.samples.push(pprof::Sample {
            location_ids,
            values: vec![value],
            labels,
        });
        self
    }

    pub fn build(self) -> pprof::Profile {
        self.profile
    }
}
