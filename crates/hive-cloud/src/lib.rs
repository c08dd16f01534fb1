//! hive-cloud — DigitalOcean provisioning for the Hive pool.
//!
//! # Architecture
//!
//! ```text
//! Provisioner (trait)
//!   └── DigitalOcean
//!       ├── request loop: backoff on network/decode errors, wait on 429
//!       ├── create_droplets: chunks of MAX_DROPLETS, created concurrently
//!       └── Droplet::activate: jittered status polling until active
//! ```

pub mod client;
pub mod droplet;
pub mod error;
pub mod provisioner;
pub mod types;

pub use client::{API_URL, DigitalOcean, MAX_DROPLETS};
pub use droplet::{Droplet, routable_addresses};
pub use error::{CloudError, CloudResult};
pub use provisioner::Provisioner;
pub use types::{DropletConfig, DropletResponse, DropletStatus, Image, SshKey};
