// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pprof wire format, as [prost] messages.
//!
//! See <https://github.com/google/pprof/blob/main/proto/profile.proto>.

mod proto;
// Assertion helpers, shared with the integration tests.
#[cfg(any(test, feature = "test-utils"))]
#[allow(clippy::panic)]
mod test_utils;

pub use proto::*;
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
