// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::aggregate::{top_entries, StackTree};
use crate::error::AggregationError;
use crate::frames::Frame;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, Serialize)]
pub struct Top {
    pub list: Vec<TopRow>,
    /// Number of distinct frames.
    pub total: usize,
    /// Number of rows in `list`.
    pub reported: usize,
    pub unit: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TopRow {
    pub frame: Arc<Frame>,
    pub flat: i64,
    pub cumulative: i64,
    pub diff: i64,
}

impl Top {
    /// Builds the top list, keeping the first `max_rows` rows; 0 keeps all.
    pub fn new(tree: &StackTree, unit: &str, max_rows: usize) -> Result<Self, AggregationError> {
        let entries = top_entries(tree)?;
        let total = entries.len();
        let keep = if max_rows == 0 { total } else { max_rows.min(total) };
        let list: Vec<TopRow> = entries
            .into_iter()
            .take(keep)
            .map(|entry| TopRow {
                frame: entry.frame,
                flat: entry.flat,
                cumulative: entry.cumulative,
                diff: entry.diff,
            })
            .collect();
        Ok(Self {
            reported: list.len(),
            list,
            total,
            unit: unit.to_string(),
        })
    }
}
