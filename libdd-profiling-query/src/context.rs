// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{QueryError, StoreError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-request state threaded through every blocking call: the request id
/// used in logs, the caller's cancellation token and an optional deadline.
#[derive(Clone, Debug)]
pub struct RequestContext {
    request_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancel,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `fut` unless the request is cancelled or its deadline passes
    /// first. An expired deadline is reported as the dependency `operation`
    /// timing out; whatever `fut` built so far is dropped.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let bounded = async {
            match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(QueryError::unavailable(operation)(StoreError::Timeout)),
                },
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QueryError::Cancelled),
            result = bounded => result,
        }
    }
}
