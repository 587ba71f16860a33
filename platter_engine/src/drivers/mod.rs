//! Driver implementations for the platter engine.

pub mod simulation;
