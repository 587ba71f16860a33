//! Run-time checks against blocking calls on the real-time path.
//!
//! A process-wide, per-thread flag identifies the elevated dispatch
//! thread. The latency contract cannot be enforced at compile time, so it
//! is enforced at run time instead: any operation that can sleep calls
//! [`check_blocking_allowed`] at entry and fails loudly when invoked from
//! the dispatch thread, rather than silently stalling audio.
//!
//! The flag is installed lazily per thread by the runtime, defaults to
//! not-real-time, and has a single writer per thread: the dispatch body
//! marks itself once, after successful elevation, and never clears it.

use std::cell::Cell;

use tracing::error;

thread_local! {
    static REALTIME: Cell<bool> = const { Cell::new(false) };
}

/// Assert that the calling thread may block.
///
/// Call at the top of any operation that can sleep (I/O, joins, channel
/// waits). If the calling thread is the elevated dispatch thread this is
/// a fatal programmer error: it is reported to the diagnostic stream and
/// the process aborts without recovery.
pub fn check_blocking_allowed() {
    if REALTIME.with(Cell::get) {
        error!("real-time thread called a blocking function");
        std::process::abort();
    }
}

/// True when called from the elevated dispatch thread.
pub fn is_realtime() -> bool {
    REALTIME.with(Cell::get)
}

/// Mark the calling thread as the elevated dispatch thread.
///
/// Called by the dispatch body exactly once, after elevation succeeds.
pub(crate) fn enter_realtime() {
    REALTIME.with(|flag| flag.set(true));
}
