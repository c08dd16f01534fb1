//! A drone is the backend process running on a droplet.

use hive_cloud::{CloudResult, Droplet, Provisioner};
use hive_core::RetryPolicy;
use thiserror::Error;
use tracing::debug;

use crate::probe::ReadinessProbe;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DroneError {
    #[error("droplet {droplet_id} has no public addresses")]
    NoAddress { droplet_id: u64 },

    #[error("drone on droplet {droplet_id} not ready after {attempts} probes")]
    NotReady { droplet_id: u64, attempts: u32 },
}

/// A backend reachable at `http://<droplet primary address>:<port>`.
#[derive(Debug, Clone)]
pub struct Drone {
    droplet: Droplet,
    port: u16,
    policy: RetryPolicy,
}

impl Drone {
    pub fn new(droplet: Droplet, port: u16) -> Self {
        Self {
            droplet,
            port,
            policy: RetryPolicy::drone_probe(),
        }
    }

    /// Delay policy between liveness probes.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn droplet(&self) -> &Droplet {
        &self.droplet
    }

    /// `ip:port` of the backend.
    pub fn address(&self) -> Result<String, DroneError> {
        let ip = self
            .droplet
            .primary_address()
            .ok_or(DroneError::NoAddress {
                droplet_id: self.droplet.id(),
            })?;
        Ok(format!("{ip}:{}", self.port))
    }

    /// Base URL for proxying.
    pub fn url(&self) -> Result<String, DroneError> {
        Ok(format!("http://{}", self.address()?))
    }

    /// Probe until the backend answers, sleeping a fresh random delay
    /// before every attempt.
    pub async fn init<R>(&self, probe: &R) -> Result<(), DroneError>
    where
        R: ReadinessProbe + ?Sized,
    {
        let droplet_id = self.droplet.id();
        let address = self.address()?;
        let mut attempts = 0;

        loop {
            if !self.policy.allows(attempts) {
                return Err(DroneError::NotReady {
                    droplet_id,
                    attempts,
                });
            }
            self.policy.sleep().await;
            attempts += 1;

            debug!(droplet_id, %address, attempt = attempts, "attempting status check");
            if probe.probe(&address).await.is_responsive() {
                debug!(droplet_id, %address, "drone ready");
                return Ok(());
            }
            debug!(droplet_id, %address, "status check failed, retrying");
        }
    }

    /// Delete the underlying droplet.
    pub async fn delete<P: Provisioner>(&self, api: &P) -> CloudResult<()> {
        self.droplet.delete(api).await
    }
}
