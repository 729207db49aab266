// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Query and aggregation core for stored stack-sample profiles.
//!
//! Profiles are ingested as rows of `(labels, stacktrace id, sample kind,
//! timestamp, value)`. Functions, mappings, locations and stacktraces are
//! content-addressed through a [`metastore::MetadataStore`], so a call path
//! seen in many profiles is stored once. Rows go to a
//! [`storage::SampleStorage`].
//!
//! On the read side, [`query::QueryService`] selects rows by label selector and
//! time, folds their stacks into a [`aggregate::StackTree`] and projects it
//! into a flamegraph, a top list or a pprof profile. Two selections can be
//! diffed; by convention `diff = B - A`.
//!
//! Both collaborators are traits. [`metastore::InMemoryMetastore`] and
//! [`storage::InMemoryStorage`] implement them for tests and tooling.

pub mod aggregate;
pub mod collections;
pub mod config;
pub mod context;
pub mod error;
pub mod frames;
pub mod ingest;
pub mod labels;
pub mod metastore;
pub mod pprof;
pub mod query;
pub mod report;
pub mod selector;
pub mod storage;

pub use config::QueryConfig;
pub use context::RequestContext;
pub use error::{AggregationError, ErrorKind, QueryError, StoreError};
