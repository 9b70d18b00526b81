//! Repository traits for part cache storage.

pub mod parts;

pub use parts::{PartFilter, PartStorage};
