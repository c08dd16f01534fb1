//! hive-pool — the Hive pool manager.
//!
//! # Architecture
//!
//! ```text
//! resolve_target(key)
//!   ├── RouteHasher → slot index
//!   ├── IdleTimer::reset
//!   ├── slot Ready   → drone URL
//!   ├── slot Pending → wait on the round's placeholder
//!   └── slot Empty   → start a round for every empty slot
//!         ├── Provisioner::create_droplets (one batch call)
//!         └── Drone::init per droplet, slot filled as each becomes ready
//!
//! IdleTimer expiry → every slot Empty, droplets deleted in the background
//! ```

pub mod error;
pub mod hive;
pub mod resolver;
pub mod timer;

pub use error::{HiveError, HiveResult};
pub use hive::{DROPLET_NAME, Hive, SlotState};
pub use resolver::TargetResolver;
pub use timer::IdleTimer;
