//! Per-request time bound and cancellation flag

use std::{future::Future, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::core::{PipelineError, PipelineResult};

/// Bounds store lookups and engine executions of one request.
///
/// Expiry and cancellation drop the in-flight future. A dropped cancel
/// sender means nobody can cancel any more, never "cancelled".
#[derive(Debug, Clone, Default)]
pub struct RequestDeadline {
    at: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl RequestDeadline {
    /// No time bound and no cancellation
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Drive `fut` to completion unless the deadline passes or the request
    /// is cancelled first. `what` describes the work for the error message.
    pub async fn run<F: Future>(&self, what: &str, fut: F) -> PipelineResult<F::Output> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled(what.to_string()));
        }

        let expired = async {
            match self.at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            output = fut => Ok(output),
            _ = expired => {
                log::warn!("Deadline passed while {what}");
                Err(PipelineError::Timeout(what.to_string()))
            }
            _ = cancelled => Err(PipelineError::Cancelled(what.to_string())),
        }
    }
}
