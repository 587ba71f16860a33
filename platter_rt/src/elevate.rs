//! Scheduling priority elevation for the dispatch thread.
//!
//! Raises the calling thread to `SCHED_FIFO` at a fixed priority,
//! validated against the platform maximum. The real syscalls are gated
//! behind the `rt` feature; without it elevation is a no-op so the engine
//! and the test suite run unprivileged.

use std::io;

use thiserror::Error;

/// Fixed real-time priority applied to the dispatch thread.
pub const REALTIME_PRIORITY: libc::c_int = 80;

/// Error raised when the thread could not be elevated.
///
/// These are environment errors (missing privileges, `RLIMIT_RTPRIO`, a
/// platform ceiling below the target), not bugs; startup fails cleanly
/// and no thread is left running elevated.
#[derive(Debug, Error)]
pub enum ElevationError {
    /// Querying the current scheduling parameters failed.
    #[error("failed to query scheduling parameters: {0}")]
    QueryFailed(#[source] io::Error),

    /// The target priority exceeds the platform maximum for `SCHED_FIFO`.
    #[error("invalid scheduling priority {requested} (maximum {max})")]
    PriorityRange {
        /// Priority the elevator asked for.
        requested: libc::c_int,
        /// Platform maximum for the real-time policy.
        max: libc::c_int,
    },

    /// The scheduler rejected the real-time policy.
    #[error("failed to apply SCHED_FIFO scheduling: {0}")]
    ApplyFailed(#[source] io::Error),
}

/// Hook type for the elevation step.
///
/// The dispatch body runs this exactly once at thread entry. Injectable
/// through `RtController::with_elevator` so tests can force a failure.
pub type Elevator = fn() -> Result<(), ElevationError>;

/// Raise the priority of the current thread.
///
/// Reads the current scheduling parameters, validates the target against
/// the platform maximum for `SCHED_FIFO`, then applies policy and
/// priority atomically. On any failure the thread keeps the scheduling
/// class it started with.
#[cfg(feature = "rt")]
pub fn raise_priority() -> Result<(), ElevationError> {
    let mut sp = libc::sched_param { sched_priority: 0 };
    if unsafe { libc::sched_getparam(0, &mut sp) } != 0 {
        return Err(ElevationError::QueryFailed(io::Error::last_os_error()));
    }

    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if max == -1 {
        return Err(ElevationError::QueryFailed(io::Error::last_os_error()));
    }
    if REALTIME_PRIORITY > max {
        return Err(ElevationError::PriorityRange {
            requested: REALTIME_PRIORITY,
            max,
        });
    }

    sp.sched_priority = REALTIME_PRIORITY;
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &sp) } != 0 {
        return Err(ElevationError::ApplyFailed(io::Error::last_os_error()));
    }

    Ok(())
}

/// No-op in simulation mode (no `rt` feature).
#[cfg(not(feature = "rt"))]
pub fn raise_priority() -> Result<(), ElevationError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_mode_elevation_is_noop() {
        #[cfg(not(feature = "rt"))]
        {
            assert!(raise_priority().is_ok());
        }
    }

    #[test]
    fn elevation_error_display() {
        let err = ElevationError::PriorityRange {
            requested: REALTIME_PRIORITY,
            max: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("80"));
        assert!(msg.contains("50"));
    }
}
