//! # velum-node
//!
//! The Velum mix node. Library surface for the daemon binary and the
//! integration tests:
//!
//! - [`cache`] - replay protection
//! - [`config`] - TOML configuration file
//! - [`node`] - the subscription loop and per-envelope pipeline

pub mod cache;
pub mod config;
pub mod node;

pub use cache::ReplayCache;
pub use node::MixNode;
