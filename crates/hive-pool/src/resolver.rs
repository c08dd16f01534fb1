//! The seam between the pool and the proxy transport.

use std::future::Future;

use crate::error::HiveResult;

/// Maps an inbound request key to the base URL it should be forwarded to.
pub trait TargetResolver: Send + Sync + 'static {
    fn resolve_target(&self, key: &str) -> impl Future<Output = HiveResult<String>> + Send;
}
