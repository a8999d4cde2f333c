// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains the data structures shared by every layer:
//! configuration, canonical records, raw payload shapes and lookup tables.

mod config;
mod payload;
pub mod province;
mod record;

// Re-export all public types
pub use config::{
    BackoffConfig, BusinessConfig, Config, EmptyParams, HarvestConfig, HttpConfig, PacingConfig,
    PathsConfig, PauseRange, RetryConfig, SignatureConfig, parse_years,
};
pub use payload::{Payload, data_payload, extract_items};
pub use record::{EntityId, Field, Record};
