//! Core domain types for the partcache upload chunk cache.
//!
//! This crate defines the data model shared by the storage layer and the CLI:
//! - Part keys (content fingerprint + size) and upload candidates
//! - Input validation performed before any storage mutation
//! - Time sources used for expiry decisions
//! - Configuration types

pub mod clock;
pub mod config;
pub mod error;
pub mod part;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use part::{NewPart, PartCandidate, PartKey};

/// Default validity window for a cached part: 3 days.
pub const DEFAULT_PART_TTL_SECS: u64 = 3 * 24 * 60 * 60;

/// Default per-operation timeout against the backing store.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Default interval between expiry sweeps: 1 hour.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
