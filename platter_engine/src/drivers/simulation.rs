//! Simulated deck and control surface.
//!
//! Software stand-ins for audio hardware so the engine runs without a
//! physical deck. `SimDeck` paces audio-block servicing with a periodic
//! timerfd and owns an eventfd used as the wake-on-stop side channel;
//! `SimPanel` is a control surface sampled once per dispatch cycle.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use platter_common::device::{Controller, Device, DeviceError, PollEntry, PollTable};
use platter_rt::guard;
use tracing::{debug, warn};

fn timerfd() -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/// Simulated deck.
///
/// A periodic timer stands in for the audio backend's block clock. The
/// deck contributes two descriptors to the dispatch table: the timer
/// itself and a wake eventfd that `stop()` arms so an in-flight dispatch
/// wait always returns (the wake-on-stop contract of `Device::stop`).
pub struct SimDeck {
    name: String,
    timer: OwnedFd,
    wake: OwnedFd,
    tick: Duration,
    rolling: AtomicBool,
    ticks: AtomicU64,
}

impl SimDeck {
    /// Create a deck serviced every `tick`.
    ///
    /// # Errors
    /// Returns the OS error when the timer or wake descriptor cannot be
    /// created.
    pub fn new(index: usize, tick: Duration) -> io::Result<Self> {
        guard::check_blocking_allowed();

        Ok(Self {
            name: format!("deck-{index}"),
            timer: timerfd()?,
            wake: eventfd()?,
            tick,
            rolling: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        })
    }

    /// Audio blocks serviced since `start()`.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// True between `start()` and `stop()`.
    pub fn is_rolling(&self) -> bool {
        self.rolling.load(Ordering::Acquire)
    }

    fn set_timer(&self, interval: Duration) -> io::Result<()> {
        let ts = duration_to_timespec(interval);
        let its = libc::itimerspec {
            it_interval: ts,
            it_value: ts,
        };
        let rc = unsafe {
            libc::timerfd_settime(self.timer.as_raw_fd(), 0, &its, ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Device for SimDeck {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_fds(&self, table: &mut PollTable) -> Result<usize, DeviceError> {
        table.push(PollEntry::readable(self.timer.as_raw_fd()))?;
        table.push(PollEntry::readable(self.wake.as_raw_fd()))?;
        Ok(2)
    }

    fn handle(&self) {
        // Consume pending timer expirations; non-blocking, EAGAIN just
        // means another descriptor woke this cycle.
        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(self.timer.as_raw_fd(), buf.as_mut_ptr().cast(), 8) };
        if n == 8 {
            let expirations = u64::from_ne_bytes(buf);
            self.ticks.fetch_add(expirations, Ordering::Relaxed);
        }
    }

    fn start(&self) {
        if let Err(e) = self.set_timer(self.tick) {
            warn!("{}: failed to arm block timer: {e}", self.name);
            return;
        }
        self.rolling.store(true, Ordering::Release);
        debug!("{} rolling (tick {}us)", self.name, self.tick.as_micros());
    }

    fn stop(&self) {
        self.rolling.store(false, Ordering::Release);
        if let Err(e) = self.set_timer(Duration::ZERO) {
            warn!("{}: failed to disarm block timer: {e}", self.name);
        }

        // Arm the wake descriptor; it stays readable, so a dispatch wait
        // that includes this deck is guaranteed to return.
        let one = 1u64.to_ne_bytes();
        let n = unsafe { libc::write(self.wake.as_raw_fd(), one.as_ptr().cast(), 8) };
        if n != 8 {
            warn!(
                "{}: failed to arm wake descriptor: {}",
                self.name,
                io::Error::last_os_error()
            );
        }
        debug!("{} stopped after {} blocks", self.name, self.ticks());
    }
}

/// Simulated control surface.
///
/// Jog-wheel movement is fed in from the owning thread with [`nudge`]
/// and folded into the applied total on the next dispatch cycle, the
/// cycle before any deck is serviced.
///
/// [`nudge`]: SimPanel::nudge
pub struct SimPanel {
    samples: AtomicU64,
    jog: AtomicI64,
    applied: AtomicI64,
}

impl SimPanel {
    /// Create an idle panel.
    pub fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            jog: AtomicI64::new(0),
            applied: AtomicI64::new(0),
        }
    }

    /// Feed simulated jog-wheel movement.
    pub fn nudge(&self, delta: i64) {
        self.jog.fetch_add(delta, Ordering::Relaxed);
    }

    /// Times the panel has been sampled.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Total jog movement consumed by dispatch cycles.
    pub fn applied(&self) -> i64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl Default for SimPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for SimPanel {
    fn name(&self) -> &str {
        "panel"
    }

    fn handle(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);

        let delta = self.jog.swap(0, Ordering::Relaxed);
        if delta != 0 {
            self.applied.fetch_add(delta, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn readable_within(fd: i32, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        n == 1 && (pfd.revents & libc::POLLIN) != 0
    }

    #[test]
    fn deck_contributes_timer_and_wake_descriptors() {
        let deck = SimDeck::new(0, Duration::from_millis(1)).unwrap();
        let mut table = PollTable::new();

        assert_eq!(deck.poll_fds(&mut table).unwrap(), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].fd(), deck.timer.as_raw_fd());
        assert_eq!(table.entries()[1].fd(), deck.wake.as_raw_fd());
    }

    #[test]
    fn deck_ticks_accumulate_while_rolling() {
        let deck = SimDeck::new(0, Duration::from_millis(2)).unwrap();
        deck.start();
        assert!(deck.is_rolling());

        thread::sleep(Duration::from_millis(50));
        deck.handle();
        assert!(deck.ticks() >= 1);

        deck.stop();
        assert!(!deck.is_rolling());
    }

    #[test]
    fn deck_stop_makes_wait_ready() {
        let deck = SimDeck::new(0, Duration::from_secs(3600)).unwrap();
        deck.start();

        // Nothing readable yet: the timer is hours away.
        assert!(!readable_within(deck.wake.as_raw_fd(), 0));

        deck.stop();
        assert!(readable_within(deck.wake.as_raw_fd(), 1000));
    }

    #[test]
    fn panel_applies_jog_on_sample() {
        let panel = SimPanel::new();
        panel.nudge(3);
        panel.nudge(-1);

        panel.handle();
        assert_eq!(panel.samples(), 1);
        assert_eq!(panel.applied(), 2);

        // Nothing pending: another sample changes only the count.
        panel.handle();
        assert_eq!(panel.samples(), 2);
        assert_eq!(panel.applied(), 2);
    }
}
