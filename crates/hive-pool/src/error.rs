//! Error types for the pool manager.

use hive_cloud::CloudError;
use hive_drone::DroneError;
use thiserror::Error;

/// Errors surfaced by `Hive`.
///
/// `Clone` so that one provisioning failure can be handed to every
/// request waiting on the same round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HiveError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Drone(#[from] DroneError),

    #[error("SSH key with name \"{0}\" not found")]
    SshKeyNotFound(String),

    #[error("hive is not initialized")]
    NotInitialized,

    #[error("hive has been destroyed")]
    Destroyed,

    #[error("provisioning round ended without a result")]
    RoundAborted,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type HiveResult<T> = Result<T, HiveError>;
