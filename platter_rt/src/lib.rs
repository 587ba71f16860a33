//! # Platter RT
//!
//! Real-time control core of the platter digital-vinyl engine. Elevates a
//! worker thread to `SCHED_FIFO`, drives a single poll-based dispatch loop
//! over the registered audio devices and input controllers, and enforces
//! the run-time contract that nothing reachable from the dispatch path
//! blocks.
//!
//! ## Threading Model
//!
//! At most two threads of interest: the owning thread (ordinary
//! scheduling) and at most one elevated dispatch thread, spawned only when
//! a registered device asked for descriptor-based waiting. The descriptor
//! table is fixed before the thread exists and read-only afterwards; the
//! termination flag is the only cross-thread mutable datum, and it moves
//! with acquire/release ordering. No locks anywhere on the dispatch path.

pub mod elevate;
pub mod guard;
pub mod rt;

pub use elevate::{ElevationError, Elevator, REALTIME_PRIORITY};
pub use rt::{CONTROLLER_CAPACITY, DEVICE_CAPACITY, RtController, RtError};
