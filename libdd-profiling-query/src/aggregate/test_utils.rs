// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::frames::{Frame, FrameLine, ResolvedStack, WeightedStack};
use crate::metastore::{function_key, location_key, stacktrace_key, Function, LineRecord, LocationRecord};
use std::sync::Arc;

/// A symbolized frame for `name` at `address`.
pub fn frame_at(name: &str, address: u64) -> Arc<Frame> {
    let function = Function {
        name: name.to_string(),
        filename: format!("{name}.rs"),
        ..Default::default()
    };
    let function_id = function_key(&function);
    let location_id = location_key(&LocationRecord {
        address,
        mapping_id: None,
        lines: vec![LineRecord {
            function_id,
            line: 0,
        }],
    });
    Arc::new(Frame {
        location_id,
        address,
        mapping: None,
        lines: vec![FrameLine {
            function_id,
            function: Arc::new(function),
            line: 0,
        }],
    })
}

/// Builds a stack from function names given root first.
pub fn stack(names: &[&str]) -> ResolvedStack {
    stack_of(names.iter().rev().map(|name| frame_at(name, 0)).collect())
}

/// Builds a stack from frames given leaf first.
pub fn stack_of(frames: Vec<Arc<Frame>>) -> ResolvedStack {
    let ids: Vec<_> = frames.iter().map(|frame| frame.location_id).collect();
    ResolvedStack {
        id: stacktrace_key(&ids),
        frames: frames.into(),
    }
}

pub fn weighted(names: &[&str], value: i64) -> WeightedStack {
    WeightedStack {
        stack: stack(names),
        value,
    }
}
