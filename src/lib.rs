//! # Field Device Simulator
//!
//! A Modbus-style field device simulation library: register banks for a
//! fixed fleet of simulated devices, a scan-loop engine that generates
//! realistic values on per-device intervals, and a dual-channel push hub
//! that fans device and system status out to monitoring subscribers.
//!
//! ## Architecture
//!
//! - [`config`] - Deployment configuration and the static device table
//! - [`registers`] - Per-device register banks and the shared store
//! - [`generator`] - Per-kind value generation
//! - [`cache`] - TTL memo decoupling generation from read cadence
//! - [`engine`] - The scan loop with its error budget
//! - [`state`] - Shared snapshots and availability flags
//! - [`protocol`] - Subscriber wire messages
//! - [`hub`] - Connection pools and message routing
//! - [`bridge`] - Register write access for control commands
//! - [`tasks`] - Periodic push pollers

#![forbid(unsafe_code)]

pub mod bridge;
pub mod cache;
pub mod config;
pub mod engine;
pub mod generator;
pub mod hub;
pub mod protocol;
pub mod registers;
pub mod state;
pub mod tasks;

pub use cache::SimulationCache;
pub use config::{Device, DeviceId, SimConfig};
pub use engine::SimulationEngine;
pub use hub::SubscriptionHub;
pub use registers::{RegisterSpace, RegisterStore};
pub use state::SharedState;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, for wire timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
