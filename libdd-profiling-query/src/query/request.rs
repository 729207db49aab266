// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request and response types of the query façade. Enumerations travel as
//! raw integers, as they do on the wire, and are checked on the way in.

use crate::error::QueryError;
use crate::labels::LabelSet;
use crate::report::{Flamegraph, Top};
use crate::storage::SampleKind;
use serde::Serialize;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<i32> for $name {
            type Error = QueryError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(QueryError::invalid(format!(
                        concat!("unknown ", stringify!($name), " {}"),
                        value
                    ))),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> Self {
                value as i32
            }
        }
    };
}

wire_enum!(Mode {
    SingleUnspecified = 0,
    Diff = 1,
    Merge = 2,
});

wire_enum!(ReportType {
    FlamegraphUnspecified = 0,
    Pprof = 1,
    Top = 2,
});

wire_enum!(
    /// How one side of a diff is selected.
    DiffSelectionMode {
        SingleUnspecified = 0,
        Merge = 1,
    }
);

/// The profile at one instant: the latest one not after `time`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SingleProfile {
    pub query: String,
    /// Milliseconds since the Unix epoch.
    pub time: Option<i64>,
}

/// Every profile in `[start, end)`, merged.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeProfile {
    pub query: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectionOptions {
    Single(SingleProfile),
    Merge(MergeProfile),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProfileDiffSelection {
    pub mode: i32,
    pub options: Option<SelectionOptions>,
}

/// `b - a`: `a` is the baseline.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiffProfile {
    pub a: Option<ProfileDiffSelection>,
    pub b: Option<ProfileDiffSelection>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueryOptions {
    Single(SingleProfile),
    Merge(MergeProfile),
    Diff(DiffProfile),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryRequest {
    pub mode: i32,
    pub options: Option<QueryOptions>,
    pub report_type: i32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResponse {
    Flamegraph(Flamegraph),
    Top(Top),
    /// A pprof profile, gzipped unless configured otherwise.
    Pprof(Vec<u8>),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryRangeRequest {
    pub query: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    /// Maximum number of series; 0 means unlimited.
    pub limit: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MetricsSample {
    pub timestamp: i64,
    pub value: i64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MetricsSeries {
    pub profile_type: SampleKind,
    pub labels: LabelSet,
    pub samples: Vec<MetricsSample>,
}

/// Without `start` and `end`, the configured recent window is used.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelsRequest {
    /// Selectors; rows matching any of them count. Empty means every row.
    pub matchers: Vec<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValuesRequest {
    pub label_name: String,
    pub matchers: Vec<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn wire_enums() {
        assert_eq!(Mode::try_from(1).unwrap(), Mode::Diff);
        assert_eq!(ReportType::try_from(2).unwrap(), ReportType::Top);
        assert_eq!(i32::from(DiffSelectionMode::Merge), 1);
        let err = ReportType::try_from(7).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "invalid input: unknown ReportType 7");
    }
}
