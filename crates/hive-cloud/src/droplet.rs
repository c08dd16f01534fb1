//! Droplet handle: a provisioned VM and its readiness poll.

use hive_core::RetryPolicy;
use tracing::{debug, info};

use crate::error::{CloudError, CloudResult};
use crate::provisioner::Provisioner;
use crate::types::{DropletResponse, DropletStatus, Networks};

/// An active droplet with at least one routable address.
///
/// `addresses[0]` is always a public IPv4 address when the droplet has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Droplet {
    id: u64,
    name: String,
    addresses: Vec<String>,
}

impl Droplet {
    /// Build a droplet handle from known parts.
    pub fn new(id: u64, name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            addresses,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn primary_address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }

    /// Poll the provider until a freshly created droplet is active.
    ///
    /// Sleeps one `poll` delay before every status request. Fails
    /// permanently if the active droplet exposes no IPv4 address.
    pub async fn activate<P>(api: &P, created: DropletResponse, poll: &RetryPolicy) -> CloudResult<Self>
    where
        P: Provisioner + ?Sized,
    {
        let id = created.id;
        let mut attempts = 0;

        loop {
            if !poll.allows(attempts) {
                return Err(CloudError::RetriesExhausted {
                    what: format!("droplet {id} activation"),
                    attempts,
                });
            }
            poll.sleep().await;
            attempts += 1;

            debug!(droplet_id = id, attempt = attempts, "polling droplet status");
            let current = api.retrieve_droplet(id).await?;

            if current.status != DropletStatus::Active {
                debug!(droplet_id = id, status = ?current.status, "not ready, retrying");
                continue;
            }

            let addresses = routable_addresses(id, &current.networks)?;
            info!(droplet_id = id, address = %addresses[0], "droplet active");

            return Ok(Self {
                id,
                name: current.name,
                addresses,
            });
        }
    }

    pub async fn delete<P>(&self, api: &P) -> CloudResult<()>
    where
        P: Provisioner + ?Sized,
    {
        debug!(droplet_id = self.id, "deleting droplet");
        api.delete_droplet(self.id).await
    }
}

/// Collect routable addresses, IPv4 first.
///
/// A droplet without IPv4 is rejected even if it has IPv6, since drones
/// are addressed with IPv4 URLs. Public addresses sort ahead of private
/// ones within each family.
pub fn routable_addresses(id: u64, networks: &Networks) -> CloudResult<Vec<String>> {
    if networks.v4.is_empty() {
        return Err(CloudError::NoPublicAddress { id });
    }

    let mut v4: Vec<_> = networks.v4.iter().collect();
    v4.sort_by_key(|addr| !addr.is_public());
    let mut v6: Vec<_> = networks.v6.iter().collect();
    v6.sort_by_key(|addr| !addr.is_public());

    Ok(v4
        .into_iter()
        .chain(v6)
        .map(|addr| addr.ip_address.clone())
        .collect())
}
