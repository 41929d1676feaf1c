use std::fmt;

use thiserror::Error;

/// Longest response body kept in an error; the rest is elided.
const MAX_ERROR_BODY: usize = 2048;

/// Network stage a publish error belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Storage,
    Registration,
    RegistrationCheck,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Storage => "storage",
            Stage::Registration => "registration",
            Stage::RegistrationCheck => "registration-check",
        })
    }
}

/// Errors from the storage and registration services.
///
/// Every variant carries the stage and endpoint so a failure can be diagnosed from the
/// log line alone.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Connection could not be established or broke mid-request.
    #[error("{stage} stage: network error contacting {endpoint}: {reason}")]
    Network {
        stage: Stage,
        endpoint: String,
        reason: String,
    },

    /// The request exceeded its deadline.
    #[error("{stage} stage: request to {endpoint} timed out")]
    Timeout { stage: Stage, endpoint: String },

    /// The service answered with a non-2xx status.
    #[error("{stage} stage: {endpoint} returned HTTP {status}: {body}")]
    Service {
        stage: Stage,
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The service answered 2xx but reported failure (`success: false`).
    #[error("{stage} stage: {endpoint} rejected the request: {reason}")]
    Rejected {
        stage: Stage,
        endpoint: String,
        reason: String,
    },

    /// The service answered 2xx with a body we cannot use.
    #[error("{stage} stage: invalid response from {endpoint}: {reason}")]
    InvalidResponse {
        stage: Stage,
        endpoint: String,
        reason: String,
    },
}

impl PublishError {
    pub fn stage(&self) -> Stage {
        match self {
            PublishError::Network { stage, .. }
            | PublishError::Timeout { stage, .. }
            | PublishError::Service { stage, .. }
            | PublishError::Rejected { stage, .. }
            | PublishError::InvalidResponse { stage, .. } => *stage,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            PublishError::Network { endpoint, .. }
            | PublishError::Timeout { endpoint, .. }
            | PublishError::Service { endpoint, .. }
            | PublishError::Rejected { endpoint, .. }
            | PublishError::InvalidResponse { endpoint, .. } => endpoint,
        }
    }

    /// HTTP status for `Service` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            PublishError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PublishError::Timeout { .. })
    }

    pub(crate) fn invalid(stage: Stage, endpoint: &str, reason: impl fmt::Display) -> Self {
        PublishError::InvalidResponse {
            stage,
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn service(stage: Stage, endpoint: &str, status: u16, body: String) -> Self {
        PublishError::Service {
            stage,
            endpoint: endpoint.to_string(),
            status,
            body: truncate_body(body),
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
