//! Device and controller contracts serviced by the dispatch core.
//!
//! This module defines:
//! - `Device` trait - A unit producing/consuming a continuous audio data flow
//! - `Controller` trait - A unit producing discrete input events
//! - `PollEntry` / `PollTable` - The bounded wait-descriptor table
//! - `DeviceError` - Error type for device operations
//!
//! A device optionally exposes wait descriptors at registration time; the
//! dispatch core multiplexes over the flattened table of all descriptors
//! and services every device and controller once per wake.

use std::mem::{align_of, size_of};
use std::os::fd::RawFd;

use static_assertions::const_assert_eq;
use thiserror::Error;

/// Capacity of the flattened wait-descriptor table.
pub const POLL_CAPACITY: usize = 32;

/// Error type for device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The descriptor table has no room for another entry.
    #[error("descriptor table full (capacity {capacity})")]
    TableFull {
        /// Fixed capacity of the table.
        capacity: usize,
    },

    /// The device could not produce its descriptors.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single wait descriptor contributed by a device.
///
/// Layout-compatible with `struct pollfd` so a table of entries can be
/// handed to `poll(2)` without conversion.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEntry {
    fd: RawFd,
    events: libc::c_short,
    revents: libc::c_short,
}

const_assert_eq!(size_of::<PollEntry>(), size_of::<libc::pollfd>());
const_assert_eq!(align_of::<PollEntry>(), align_of::<libc::pollfd>());

impl PollEntry {
    /// Entry waiting for `fd` to become readable.
    pub fn readable(fd: RawFd) -> Self {
        Self::new(fd, libc::POLLIN)
    }

    /// Entry waiting for `fd` to become writable.
    pub fn writable(fd: RawFd) -> Self {
        Self::new(fd, libc::POLLOUT)
    }

    /// Entry waiting for an arbitrary `poll(2)` event mask.
    pub fn new(fd: RawFd, events: libc::c_short) -> Self {
        Self {
            fd,
            events,
            revents: 0,
        }
    }

    /// The descriptor being waited on.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The requested event mask.
    pub fn events(&self) -> libc::c_short {
        self.events
    }
}

/// Flattened, bounded table of wait descriptors.
///
/// Populated during device registration and fixed before the dispatch
/// thread is spawned; the requested events never change afterwards.
#[derive(Debug, Clone, Default)]
pub struct PollTable {
    entries: heapless::Vec<PollEntry, POLL_CAPACITY>,
}

impl PollTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Append an entry.
    ///
    /// # Errors
    /// Returns `DeviceError::TableFull` when the table is at capacity;
    /// the table is unchanged in that case.
    pub fn push(&mut self, entry: PollEntry) -> Result<(), DeviceError> {
        self.entries.push(entry).map_err(|_| DeviceError::TableFull {
            capacity: POLL_CAPACITY,
        })
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no device has contributed a descriptor.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in contribution order.
    pub fn entries(&self) -> &[PollEntry] {
        &self.entries
    }

    /// Mutable view for the dispatch wait; `poll(2)` writes returned
    /// events in place.
    pub fn entries_mut(&mut self) -> &mut [PollEntry] {
        &mut self.entries
    }

    /// Drop every entry past `len`, undoing a partial contribution.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}

/// A unit producing/consuming a continuous audio data flow.
///
/// # Lifecycle
///
/// 1. `poll_fds()` - Called once at registration, before the dispatch
///    thread exists
/// 2. `start()` - Begin the data flow, called once per session
/// 3. `handle()` - Called once per dispatch wake, in registration order
/// 4. `stop()` - Halt the data flow, called once per session
///
/// `handle()` runs on the elevated real-time thread and must not block;
/// any helper that can sleep must call
/// `platter_rt::guard::check_blocking_allowed` at entry so a violation
/// fails loudly instead of silently breaking the latency contract.
pub trait Device: Send + Sync {
    /// Short name for diagnostics (e.g. "deck-0").
    fn name(&self) -> &str;

    /// Contribute wait descriptors to the dispatch table.
    ///
    /// Called exactly once, at registration. The wait set is captured
    /// here and never consulted again; devices must not change their
    /// descriptor requirements later. A device that drives itself (its
    /// backend runs its own thread) contributes nothing and returns 0.
    ///
    /// # Errors
    /// Return an error if the descriptors cannot be supplied; the device
    /// is then left unregistered and any entries it already pushed are
    /// discarded.
    fn poll_fds(&self, table: &mut PollTable) -> Result<usize, DeviceError>;

    /// Service the device after a dispatch wake.
    ///
    /// Real-time path: must be non-blocking and allocation-free. Invoked
    /// on every wake regardless of which descriptors were ready.
    fn handle(&self);

    /// Begin the device's data flow.
    fn start(&self);

    /// Halt the device's data flow.
    ///
    /// Implementations MUST cause any in-progress dispatch wait that
    /// includes this device's descriptors to become ready (close a
    /// descriptor, arm an eventfd, write a self-pipe). The dispatch
    /// thread is joined only after every device has stopped, and its
    /// wait has no timeout; a stop that never wakes the wait leaves
    /// shutdown blocked indefinitely.
    fn stop(&self);
}

/// A unit producing discrete input events (e.g. a control surface).
///
/// Controllers never contribute wait descriptors. They are sampled once
/// per dispatch cycle, before any device is serviced, so control input
/// is visible to the devices that consume it within the same cycle.
pub trait Controller: Send + Sync {
    /// Short name for diagnostics (e.g. "panel").
    fn name(&self) -> &str;

    /// Sample the controller. Real-time path: must not block.
    fn handle(&self);
}
