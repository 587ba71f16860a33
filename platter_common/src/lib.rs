//! # Platter Common
//!
//! Shared contracts for the platter digital-vinyl engine: the [`device`]
//! module defines the `Device`/`Controller` traits serviced by the
//! real-time dispatch core together with the bounded poll-descriptor
//! table, and [`config`] holds the TOML engine configuration.

pub mod config;
pub mod device;
