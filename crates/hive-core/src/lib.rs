//! hive-core — shared building blocks for the Hive autoscaling proxy.
//!
//! - **`hash`** — seeded routing hash from request keys to pool slots
//! - **`retry`** — randomized delay policy for API retries and readiness polling
//! - **`config`** — `hive.toml` configuration

pub mod config;
pub mod hash;
pub mod retry;

pub use config::{
    CloudConfig, ConfigError, HiveConfig, ImageRef, Provider, ReclaimStrategy, WorkerConfig,
};
pub use hash::RouteHasher;
pub use retry::RetryPolicy;
