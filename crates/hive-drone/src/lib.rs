//! hive-drone — backends running on provisioned droplets.
//!
//! A `Drone` wraps an active `Droplet` and is ready once its HTTP server
//! answers a `HEAD /` probe. Probing retries forever by default with a
//! random `[0, 1s)` delay before each attempt.

pub mod drone;
pub mod probe;

pub use drone::{Drone, DroneError};
pub use probe::{HttpProbe, ProbeResult, ReadinessProbe, http_probe};
