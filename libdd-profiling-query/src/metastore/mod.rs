// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed identity for the metadata behind a stack: mappings,
//! functions, locations and stacktraces.
//!
//! Every id is derived from the record's identity fields (see [keys]), so the
//! same record always gets the same id no matter which process or request
//! creates it. The backing [MetadataStore] only has to make create-if-absent
//! atomic per id.

mod client;
mod keys;
mod memory;

pub use client::*;
pub use keys::*;
pub use memory::*;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;

/// A 16-byte content id, opaque to everything but [keys].
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ContentId([u8; 16]);

impl ContentId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

macro_rules! content_id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub ContentId);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$name> for ContentId {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

content_id_type!(MappingId);
content_id_type!(FunctionId);
content_id_type!(LocationId);
content_id_type!(
    /// Identifies an ordered sequence of locations, leaf first.
    StacktraceId
);

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct Mapping {
    pub memory_start: u64,
    pub memory_limit: u64,
    pub file_offset: u64,
    pub filename: String,
    pub build_id: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct Function {
    pub name: String,
    pub system_name: String,
    pub filename: String,
    pub start_line: i64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LineRecord {
    pub function_id: FunctionId,
    pub line: i64,
}

/// A location as stored: linked records are referenced by id.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LocationRecord {
    pub address: u64,
    pub mapping_id: Option<MappingId>,
    /// Inlined lines, innermost first. Empty for unsymbolized locations.
    pub lines: Vec<LineRecord>,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StacktraceRecord {
    /// The leaf is at location_ids\[0\].
    pub location_ids: Vec<LocationId>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Mapping,
    Function,
    Location,
    Stacktrace,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Mapping => "mapping",
            RecordKind::Function => "function",
            RecordKind::Location => "location",
            RecordKind::Stacktrace => "stacktrace",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MetaRecord {
    Mapping(Mapping),
    Function(Function),
    Location(LocationRecord),
    Stacktrace(StacktraceRecord),
}

impl MetaRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            MetaRecord::Mapping(_) => RecordKind::Mapping,
            MetaRecord::Function(_) => RecordKind::Function,
            MetaRecord::Location(_) => RecordKind::Location,
            MetaRecord::Stacktrace(_) => RecordKind::Stacktrace,
        }
    }

    /// The id derived from the record's identity fields.
    pub fn content_id(&self) -> ContentId {
        match self {
            MetaRecord::Mapping(mapping) => mapping_key(mapping).0,
            MetaRecord::Function(function) => function_key(function).0,
            MetaRecord::Location(location) => location_key(location).0,
            MetaRecord::Stacktrace(stack) => stacktrace_key(&stack.location_ids).0,
        }
    }
}

/// The key-value store holding metadata records.
///
/// Implementations must make [MetadataStore::resolve_or_create_many] atomic
/// per id: concurrent callers creating the same id converge on one record.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Looks up records by id. The result has one entry per requested id, in
    /// request order; `None` marks an id the store doesn't hold.
    async fn get_many(
        &self,
        kind: RecordKind,
        ids: &[ContentId],
    ) -> Result<Vec<Option<MetaRecord>>, StoreError>;

    /// Stores every record whose id isn't present yet and returns the ids in
    /// request order. Existing records are left untouched.
    async fn resolve_or_create_many(
        &self,
        records: Vec<(ContentId, MetaRecord)>,
    ) -> Result<Vec<ContentId>, StoreError>;

    async fn get(&self, kind: RecordKind, id: ContentId) -> Result<Option<MetaRecord>, StoreError> {
        let mut records = self.get_many(kind, &[id]).await?;
        Ok(records.pop().flatten())
    }

    async fn resolve_or_create(&self, id: ContentId, record: MetaRecord) -> Result<ContentId, StoreError> {
        self.resolve_or_create_many(vec![(id, record)])
            .await?
            .pop()
            .ok_or_else(|| StoreError::unavailable("store returned no id"))
    }
}
