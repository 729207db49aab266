// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Ingests pprof files into in-memory stores and replays a merge query over
//! them, printing the flamegraph or top list as JSON or writing the merged
//! pprof.

use anyhow::Context;
use clap::{command, value_parser, Arg, ArgAction};
use libdd_profiling_query::labels::{LabelSet, METRIC_NAME_LABEL};
use libdd_profiling_query::metastore::InMemoryMetastore;
use libdd_profiling_query::pprof::Profile;
use libdd_profiling_query::query::{
    MergeProfile, Mode, QueryOptions, QueryRequest, QueryResponse, QueryService, ReportType,
};
use libdd_profiling_query::report::pprof::decode;
use libdd_profiling_query::storage::InMemoryStorage;
use libdd_profiling_query::QueryConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const NANOS_PER_MILLI: i64 = 1_000_000;

fn string(profile: &Profile, index: i64) -> anyhow::Result<&str> {
    usize::try_from(index)
        .ok()
        .and_then(|index| profile.string_table.get(index))
        .map(String::as_str)
        .with_context(|| format!("string {index} is out of range"))
}

/// The selector picking `sample_type` of `profile` under `name`.
fn profile_type_query(name: &str, profile: &Profile, sample_type: usize) -> anyhow::Result<String> {
    let value_type = profile.sample_types.get(sample_type).with_context(|| {
        format!(
            "sample type {sample_type} is out of range, the profile has {}",
            profile.sample_types.len()
        )
    })?;
    let (period_type, period_unit) = match profile.period_type {
        Some(period) => (string(profile, period.r#type)?, string(profile, period.unit)?),
        None => ("", ""),
    };
    Ok(format!(
        "{name}:{}:{}:{period_type}:{period_unit}",
        string(profile, value_type.r#type)?,
        string(profile, value_type.unit)?
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = command!()
        .arg(
            Arg::new("input")
                .short('i')
                .help("a pprof to ingest, plain or gzipped; may be repeated")
                .action(ArgAction::Append)
                .required(true),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .help("the profile name the inputs are ingested under")
                .default_value("replay"),
        )
        .arg(
            Arg::new("sample-type")
                .long("sample-type")
                .help("index of the sample type to query")
                .value_parser(value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .help("the report to build")
                .value_parser(["flamegraph", "top", "pprof"])
                .default_value("top"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("the path to save the report to instead of printing it")
                .required(false),
        )
        .get_matches();

    let inputs: Vec<&String> = matches
        .get_many::<String>("input")
        .context("at least one input is required")?
        .collect();
    let name = matches
        .get_one::<String>("name")
        .context("the profile name has a default")?;
    let sample_type = *matches
        .get_one::<usize>("sample-type")
        .context("the sample type has a default")?;
    let report_type = match matches.get_one::<String>("report").map(String::as_str) {
        Some("flamegraph") => ReportType::FlamegraphUnspecified,
        Some("pprof") => ReportType::Pprof,
        _ => ReportType::Top,
    };
    let output = matches.get_one::<String>("output");
    if report_type == ReportType::Pprof && output.is_none() {
        anyhow::bail!("a pprof report needs an output path");
    }

    let service = QueryService::new(
        QueryConfig::from_env(),
        Arc::new(InMemoryMetastore::new()),
        Arc::new(InMemoryStorage::new()),
    );
    let ingester = service.ingester();
    let labels = LabelSet::from_pairs([(METRIC_NAME_LABEL, name.as_str())])?;

    let mut query = None;
    let mut window: Option<(i64, i64)> = None;
    let before = Instant::now();
    for (index, input) in inputs.iter().enumerate() {
        let source = std::fs::read(input).with_context(|| format!("reading {input}"))?;
        let profile = decode(&source).with_context(|| format!("decoding {input}"))?;
        if query.is_none() {
            query = Some(profile_type_query(name, &profile, sample_type)?);
        }
        // Inputs without a timestamp are laid out one millisecond apart.
        let timestamp = match profile.time_nanos / NANOS_PER_MILLI {
            0 => index as i64,
            timestamp => timestamp,
        };
        window = Some(match window {
            Some((start, end)) => (start.min(timestamp), end.max(timestamp)),
            None => (timestamp, timestamp),
        });
        let ctx = service.context(CancellationToken::new());
        let rows = ingester
            .ingest(&ctx, &labels, &profile, false, Some(timestamp))
            .await
            .with_context(|| format!("ingesting {input}"))?;
        info!(input = %input, samples = profile.samples.len(), rows, "ingested");
    }
    info!(elapsed_ms = before.elapsed().as_millis() as u64, "ingestion done");

    let query = query.context("no input to query")?;
    let (start, end) = window.context("no input to query")?;
    let request = QueryRequest {
        mode: Mode::Merge.into(),
        options: Some(QueryOptions::Merge(MergeProfile {
            query: query.clone(),
            start: Some(start),
            end: Some(end.saturating_add(1)),
        })),
        report_type: report_type.into(),
    };

    let before = Instant::now();
    let response = service
        .query(request, CancellationToken::new())
        .await
        .with_context(|| format!("querying {query}"))?;
    info!(query = %query, elapsed_ms = before.elapsed().as_millis() as u64, "query done");

    let encoded = match response {
        QueryResponse::Pprof(bytes) => bytes,
        report => serde_json::to_vec_pretty(&report)?,
    };
    match output {
        Some(file) => {
            std::fs::write(file, encoded).with_context(|| format!("writing {file}"))?;
            info!(output = %file, "report written");
        }
        None => println!("{}", String::from_utf8_lossy(&encoded)),
    }
    Ok(())
}
