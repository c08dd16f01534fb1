//! The seam between the pool manager and the cloud provider.

use std::future::Future;

use crate::droplet::Droplet;
use crate::error::CloudResult;
use crate::types::{DropletConfig, DropletResponse, Image, SshKey};

/// Remote operations the pool needs from a cloud provider.
///
/// `create_droplets` only returns once every droplet is active and
/// address-bearing, or the whole call has failed.
pub trait Provisioner: Send + Sync + 'static {
    fn create_droplets(
        &self,
        names: &[String],
        config: &DropletConfig,
    ) -> impl Future<Output = CloudResult<Vec<Droplet>>> + Send;

    fn retrieve_droplet(&self, id: u64) -> impl Future<Output = CloudResult<DropletResponse>> + Send;

    fn delete_droplet(&self, id: u64) -> impl Future<Output = CloudResult<()>> + Send;

    fn delete_droplets_by_tag(&self, tag: &str) -> impl Future<Output = CloudResult<()>> + Send;

    fn list_ssh_keys(&self) -> impl Future<Output = CloudResult<Vec<SshKey>>> + Send;

    /// Private (user) images.
    fn list_user_images(&self) -> impl Future<Output = CloudResult<Vec<Image>>> + Send;
}
