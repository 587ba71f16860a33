//! # Platter Engine Library
//!
//! Driver implementations for the platter engine binary. The [`drivers`]
//! module holds software-simulated devices and controllers so the
//! real-time dispatch core can run without audio hardware.

pub mod drivers;
