//! # velum-ingress
//!
//! The Velum ingress wrapper. Library surface for the daemon binary and the
//! integration tests:
//!
//! - [`config`] - TOML configuration file
//! - [`path`] - hop path validation and per-event shuffling
//! - [`server`] - the client-facing WebSocket endpoint

pub mod config;
pub mod path;
pub mod server;

pub use path::{shuffle_path, validate_path};
pub use server::Ingress;
