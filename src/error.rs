// src/error.rs
//! Error taxonomy for one collection cycle.
//!
//! Nothing here is fatal to the process: every variant is scoped to a single
//! cycle of a single source and the next scheduled run starts clean.

use thiserror::Error;

/// Failures raised while fetching or parsing provider data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectError {
    /// Network error, timeout or 5xx. Retried within pagination.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// 4xx or a provider-level refusal. Not retried; the cycle is skipped.
    #[error("upstream rejected request (status {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    /// Malformed payload. Item-scoped when raised by `parse_item`.
    #[error("parse error: {0}")]
    Parse(String),
}

impl CollectError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollectError::UpstreamUnavailable(_))
    }

    /// Classify a reqwest transport failure.
    pub fn from_transport(e: &reqwest::Error) -> Self {
        CollectError::UpstreamUnavailable(e.to_string())
    }

    /// Map a non-success HTTP status: 5xx is transient, everything else is a rejection.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        if status.is_server_error() {
            CollectError::UpstreamUnavailable(format!("status {}: {}", status.as_u16(), snippet))
        } else {
            CollectError::UpstreamRejected {
                status: status.as_u16(),
                message: snippet,
            }
        }
    }
}

/// Failures of one downstream delivery call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("downstream unavailable: {0}")]
    Unavailable(String),

    #[error("downstream rejected batch (status {status})")]
    Rejected { status: u16 },
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Unavailable(_))
    }
}

/// A cycle that could not produce an outcome at all.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("collection failed: {0}")]
    Upstream(CollectError),

    #[error("watermark store failure: {0:#}")]
    Store(anyhow::Error),

    /// The cycle task panicked or was cancelled by the runtime.
    #[error("cycle aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let e = CollectError::from_status(StatusCode::BAD_GATEWAY, "oops");
        assert!(e.is_transient());

        let e = CollectError::from_status(StatusCode::FORBIDDEN, "bad key");
        assert_eq!(
            e,
            CollectError::UpstreamRejected {
                status: 403,
                message: "bad key".into()
            }
        );
        assert!(!e.is_transient());
    }

    #[test]
    fn only_unavailable_delivery_is_retryable() {
        assert!(DeliveryError::Unavailable("reset".into()).is_retryable());
        assert!(!DeliveryError::Rejected { status: 400 }.is_retryable());
    }
}
