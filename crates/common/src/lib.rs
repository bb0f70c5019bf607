//! Common types shared across the mesh crates.

#![warn(clippy::pedantic)]

/// Module for common identifier types
pub mod types;
