//! hive-proxy — inbound HTTP front end for the Hive pool.
//!
//! Every request is keyed by its path and query, handed to a
//! `TargetResolver` for a drone base URL, and forwarded there unchanged
//! apart from the optional basic-auth header.
//!
//! # Architecture
//!
//! ```text
//! HTTP client
//!   │
//!   ▼
//! hyper server (ProxyServer)
//!   │
//!   ├── routing key = path?query
//!   ├── TargetResolver::resolve_target(key) → http://ip:port
//!   ├── forward with hyper-util client (+ Authorization: Basic ...)
//!   │
//!   ▼
//! drone response, or 500 "Got error: ..."
//! ```

pub mod convert;
pub mod server;

pub use server::{ProxyBody, ProxyServer};
