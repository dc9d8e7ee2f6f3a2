#![forbid(unsafe_code)]

//! panel-lab: hardware/service simulation sandbox for settings-panel testing.
//!
//! Provisions an isolated display and private message buses, orchestrates
//! mock system services with reactive property cascades, synthesizes device
//! topologies, and drives panel test binaries or interactive scenarios
//! against the resulting sandbox.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod mock;
pub mod sandbox;
pub mod scenario;
pub mod topology;
