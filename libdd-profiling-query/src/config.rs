// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub mod parse_env {
    use std::{env, str::FromStr, time::Duration};

    pub fn duration(name: &str) -> Option<Duration> {
        Duration::try_from_secs_f32(env::var(name).ok()?.parse::<f32>().ok()?).ok()
    }

    pub fn int<T: FromStr>(name: &str) -> Option<T> {
        env::var(name).ok()?.parse::<T>().ok()
    }

    pub fn bool(name: &str) -> Option<bool> {
        match env::var(name).ok()?.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            _ => Some(false),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// How far back label, value and profile-type enumeration looks when the
    /// request doesn't give a time window.
    pub metadata_window: Duration,
    /// Deadline applied to every storage and metastore call of a request.
    pub request_timeout: Option<Duration>,
    /// Fold sets with at least this many stacks are split across workers.
    pub parallel_fold_threshold: usize,
    pub fold_partitions: usize,
    /// Capacity of the function lookup cache handed to the metastore client.
    pub function_cache_capacity: usize,
    /// Truncates top lists; 0 keeps every row.
    pub top_max_rows: usize,
    /// Gzip pprof reports.
    pub compress_pprof: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            metadata_window: Duration::from_secs(6 * 60 * 60),
            request_timeout: None,
            parallel_fold_threshold: 8192,
            fold_partitions: 4,
            function_cache_capacity: 4096,
            top_max_rows: 0,
            compress_pprof: true,
        }
    }
}

pub struct FromEnv {}

impl FromEnv {
    const METADATA_WINDOW: &'static str = "DD_PROFILING_QUERY_METADATA_WINDOW";
    const REQUEST_TIMEOUT: &'static str = "DD_PROFILING_QUERY_REQUEST_TIMEOUT";
    const PARALLEL_FOLD_THRESHOLD: &'static str = "DD_PROFILING_QUERY_PARALLEL_FOLD_THRESHOLD";
    const FOLD_PARTITIONS: &'static str = "DD_PROFILING_QUERY_FOLD_PARTITIONS";
    const FUNCTION_CACHE_CAPACITY: &'static str = "DD_PROFILING_QUERY_FUNCTION_CACHE_CAPACITY";
    const TOP_MAX_ROWS: &'static str = "DD_PROFILING_QUERY_TOP_MAX_ROWS";
    const COMPRESS_PPROF: &'static str = "DD_PROFILING_QUERY_COMPRESS_PPROF";
}

impl QueryConfig {
    /// Reads the configuration from `DD_PROFILING_QUERY_*` environment
    /// variables. Unset or unparseable variables keep their default.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            metadata_window: parse_env::duration(FromEnv::METADATA_WINDOW)
                .unwrap_or(default.metadata_window),
            request_timeout: parse_env::duration(FromEnv::REQUEST_TIMEOUT)
                .filter(|timeout| !timeout.is_zero())
                .or(default.request_timeout),
            parallel_fold_threshold: parse_env::int(FromEnv::PARALLEL_FOLD_THRESHOLD)
                .unwrap_or(default.parallel_fold_threshold),
            fold_partitions: parse_env::int(FromEnv::FOLD_PARTITIONS)
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.fold_partitions),
            function_cache_capacity: parse_env::int(FromEnv::FUNCTION_CACHE_CAPACITY)
                .unwrap_or(default.function_cache_capacity),
            top_max_rows: parse_env::int(FromEnv::TOP_MAX_ROWS).unwrap_or(default.top_max_rows),
            compress_pprof: parse_env::bool(FromEnv::COMPRESS_PPROF)
                .unwrap_or(default.compress_pprof),
        }
    }
}
