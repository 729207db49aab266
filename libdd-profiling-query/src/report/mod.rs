// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Projections of an aggregated result into the shapes callers consume.

mod flamegraph;
pub mod pprof;
mod top;

pub use flamegraph::*;
pub use top::*;
