// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Denormalized frames: locations with their mapping and functions resolved,
//! as the aggregation engine and the report encoders consume them.

use crate::metastore::{Function, FunctionId, LocationId, Mapping, MappingId, StacktraceId};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FrameMapping {
    pub id: MappingId,
    pub mapping: Arc<Mapping>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FrameLine {
    pub function_id: FunctionId,
    pub function: Arc<Function>,
    pub line: i64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Frame {
    pub location_id: LocationId,
    pub address: u64,
    pub mapping: Option<FrameMapping>,
    /// Inlined lines, innermost first.
    pub lines: Vec<FrameLine>,
}

/// What makes two frames the same node of a report.
///
/// Symbolized frames are compared by mapping and functions, so that two
/// addresses inside the same function collapse into one node. Frames without
/// lines only have their location to go by.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum FrameKey {
    Symbolized {
        mapping: Option<MappingId>,
        functions: Box<[FunctionId]>,
    },
    Unsymbolized(LocationId),
}

impl Frame {
    pub fn key(&self) -> FrameKey {
        if self.lines.is_empty() {
            return FrameKey::Unsymbolized(self.location_id);
        }
        FrameKey::Symbolized {
            mapping: self.mapping.as_ref().map(|mapping| mapping.id),
            functions: self.lines.iter().map(|line| line.function_id).collect(),
        }
    }

    /// The innermost function name, or the address for unsymbolized frames.
    pub fn name(&self) -> String {
        match self.lines.first() {
            Some(line) => line.function.name.clone(),
            None => format!("{:#x}", self.address),
        }
    }
}

/// A stacktrace with every frame resolved. Frames are leaf first.
#[derive(Clone, Debug)]
pub struct ResolvedStack {
    pub id: StacktraceId,
    pub frames: Arc<[Arc<Frame>]>,
}

/// A stack and the value observed for it.
#[derive(Clone, Debug)]
pub struct WeightedStack {
    pub stack: ResolvedStack,
    pub value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::{function_key, ContentId};

    fn frame(location: u8, address: u64, functions: &[&str]) -> Frame {
        Frame {
            location_id: LocationId(ContentId::from_bytes([location; 16])),
            address,
            mapping: None,
            lines: functions
                .iter()
                .map(|name| {
                    let function = Function {
                        name: name.to_string(),
                        ..Default::default()
                    };
                    FrameLine {
                        function_id: function_key(&function),
                        function: Arc::new(function),
                        line: 0,
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn same_function_different_address_share_a_key() {
        let a = frame(1, 0x1, &["main"]);
        let b = frame(2, 0x2, &["main"]);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), frame(3, 0x3, &["other"]).key());
        assert_eq!(a.name(), "main");
    }

    #[test]
    fn unsymbolized_frames_use_the_location() {
        let a = frame(1, 0x10, &[]);
        let b = frame(2, 0x10, &[]);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.name(), "0x10");
    }
}
