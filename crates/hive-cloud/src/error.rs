//! Error types for the provisioning client.

use thiserror::Error;

/// Failures surfaced by the provisioning client.
///
/// Transient network errors, malformed bodies and rate limiting are
/// retried internally and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("missing API token: set cloud.auth_token or the API_TOKEN env var")]
    MissingToken,

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("invalid status code: {status} body: {body}")]
    Api { status: u16, body: String },

    #[error("droplet {id} has no public IPv4 address")]
    NoPublicAddress { id: u64 },

    #[error("requested {requested} droplets, provider created {created}")]
    ShortBatch { requested: usize, created: usize },

    #[error("{what} gave up after {attempts} attempts")]
    RetriesExhausted { what: String, attempts: u32 },
}

pub type CloudResult<T> = Result<T, CloudError>;
