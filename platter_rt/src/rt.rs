//! Real-time dispatch: registry, lifecycle and the dispatch thread body.
//!
//! The owning thread registers devices and controllers, then calls
//! `start()`. If any device contributed wait descriptors a dispatch
//! thread is spawned, elevated, and parked in an indefinite `poll(2)`
//! over the flattened descriptor table; every wake samples all
//! controllers and then services all devices, in registration order.
//! `stop()` reverses this: flag termination, halt each device's data
//! flow (which wakes the blocked wait, see `Device::stop`), and join.
//!
//! The descriptor table is captured entirely before the thread exists
//! and is read-only afterwards; the termination flag is the sole
//! cross-thread shutdown signal.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use platter_common::device::{Controller, Device, DeviceError, PollEntry, PollTable};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::elevate::{self, ElevationError, Elevator};
use crate::guard;

/// Maximum number of registered audio devices.
pub const DEVICE_CAPACITY: usize = 4;

/// Maximum number of registered controllers.
pub const CONTROLLER_CAPACITY: usize = 4;

/// Errors raised by registration and startup.
#[derive(Debug, Error)]
pub enum RtError {
    /// The device table is full.
    #[error("too many audio devices (capacity {capacity})")]
    TooManyDevices {
        /// Fixed capacity of the device table.
        capacity: usize,
    },

    /// The controller table is full.
    #[error("too many controllers (capacity {capacity})")]
    TooManyControllers {
        /// Fixed capacity of the controller table.
        capacity: usize,
    },

    /// A device could not supply its wait descriptors.
    #[error("device failed to return poll descriptors: {0}")]
    Descriptors(#[from] DeviceError),

    /// The dispatch thread could not be elevated; startup is abandoned.
    #[error("real-time elevation failed: {0}")]
    Elevation(#[from] ElevationError),

    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Hook type for the dispatch wait.
///
/// Injectable through `RtController::with_waiter` so tests can simulate
/// interruption and hard wait failures.
pub type Waiter = fn(&mut [PollEntry]) -> io::Result<usize>;

/// Default waiter: block in `poll(2)` over the whole table, no timeout.
pub fn poll_indefinite(entries: &mut [PollEntry]) -> io::Result<usize> {
    // PollEntry is layout-pinned to struct pollfd in platter_common.
    let n = unsafe {
        libc::poll(
            entries.as_mut_ptr().cast::<libc::pollfd>(),
            entries.len() as libc::nfds_t,
            -1,
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// State shared between the owning thread and the dispatch thread.
struct Shared {
    /// Sole cross-thread shutdown signal; transitions false→true once.
    terminated: AtomicBool,
    /// Raised when the dispatch wait failed for a non-benign reason and
    /// the loop ended before termination was requested.
    poll_fault: AtomicBool,
    /// Completed dispatch cycles.
    wakes: AtomicU64,
}

/// Real-time handler for a set of devices and controllers.
///
/// Single instance per audio session, owned by the invoking thread.
/// Single-use: populate, `start()` once, `stop()` once.
///
/// # Panics
/// Registering a device or controller after `start()`, or calling
/// `start()` twice, is a programmer error and panics: the descriptor
/// table must be fixed before the dispatch thread exists.
pub struct RtController {
    devices: heapless::Vec<Arc<dyn Device>, DEVICE_CAPACITY>,
    controllers: heapless::Vec<Arc<dyn Controller>, CONTROLLER_CAPACITY>,
    table: PollTable,
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
    elevator: Elevator,
    waiter: Waiter,
    started: bool,
}

impl RtController {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self {
            devices: heapless::Vec::new(),
            controllers: heapless::Vec::new(),
            table: PollTable::new(),
            shared: Arc::new(Shared {
                terminated: AtomicBool::new(false),
                poll_fault: AtomicBool::new(false),
                wakes: AtomicU64::new(0),
            }),
            thread: None,
            elevator: elevate::raise_priority,
            waiter: poll_indefinite,
            started: false,
        }
    }

    /// Replace the elevation hook. Test seam; the default applies
    /// `SCHED_FIFO` at [`crate::REALTIME_PRIORITY`].
    pub fn with_elevator(mut self, elevator: Elevator) -> Self {
        self.elevator = elevator;
        self
    }

    /// Replace the dispatch wait. Test seam; the default blocks in
    /// `poll(2)` with no timeout.
    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Add a device to this real-time handler.
    ///
    /// The device's wait descriptors are captured here, before the
    /// dispatch thread exists, and never re-queried.
    ///
    /// # Errors
    /// `RtError::TooManyDevices` when the device table is full;
    /// `RtError::Descriptors` when the device cannot supply its
    /// descriptors. In both cases the device is left unregistered and
    /// the descriptor table is unchanged.
    pub fn add_device(&mut self, device: Arc<dyn Device>) -> Result<(), RtError> {
        assert!(!self.started, "devices must be registered before start");

        if self.devices.is_full() {
            error!("too many audio devices (capacity {DEVICE_CAPACITY})");
            return Err(RtError::TooManyDevices {
                capacity: DEVICE_CAPACITY,
            });
        }

        // The requested poll events never change, so populate the entry
        // table before the dispatch thread is launched.
        let mark = self.table.len();
        match device.poll_fds(&mut self.table) {
            Ok(n) => {
                debug!("registered device {} ({} poll entries)", device.name(), n);
            }
            Err(e) => {
                self.table.truncate(mark);
                error!("device {} failed to return descriptors: {e}", device.name());
                return Err(RtError::Descriptors(e));
            }
        }

        if self.devices.push(device).is_err() {
            unreachable!("device table capacity checked above");
        }
        Ok(())
    }

    /// Add a controller to this real-time handler.
    ///
    /// Controllers have no poll entries; they are sampled on every cycle
    /// of the audio, ahead of the devices.
    ///
    /// # Errors
    /// `RtError::TooManyControllers` when the controller table is full.
    pub fn add_controller(&mut self, controller: Arc<dyn Controller>) -> Result<(), RtError> {
        assert!(!self.started, "controllers must be registered before start");

        if self.controllers.is_full() {
            error!("too many controllers (capacity {CONTROLLER_CAPACITY})");
            return Err(RtError::TooManyControllers {
                capacity: CONTROLLER_CAPACITY,
            });
        }

        debug!("registered controller {}", controller.name());
        if self.controllers.push(controller).is_err() {
            unreachable!("controller table capacity checked above");
        }
        Ok(())
    }

    /// Start real-time handling of the registered devices.
    ///
    /// Spawns the dispatch thread only if some device returned wait
    /// descriptors; self-threaded backends need no thread of ours. The
    /// call blocks until the spawned thread reports its elevation
    /// outcome. A failed elevation is a fatal startup condition, not a
    /// degraded mode: the thread is joined, no device is started, and
    /// the error is returned.
    ///
    /// # Errors
    /// `RtError::Spawn` when the thread cannot be created and
    /// `RtError::Elevation` when the scheduler refused the real-time
    /// policy.
    pub fn start(&mut self) -> Result<(), RtError> {
        guard::check_blocking_allowed();
        assert!(!self.started, "RtController is single-use; start() already ran");
        self.started = true;

        if !self.table.is_empty() {
            info!(
                "launching real-time thread to handle {} devices ({} poll entries)",
                self.devices.len(),
                self.table.len()
            );

            let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), ElevationError>>(1);
            let dispatch = Dispatch {
                entries: self.table.clone(),
                devices: self.devices.clone(),
                controllers: self.controllers.clone(),
                shared: Arc::clone(&self.shared),
                elevator: self.elevator,
                waiter: self.waiter,
            };

            let handle = thread::Builder::new()
                .name("platter-rt".to_string())
                .spawn(move || dispatch.run(ready_tx))
                .map_err(RtError::Spawn)?;

            // Wait for the dispatch thread to declare it is initialised.
            let outcome = ready_rx
                .recv()
                .expect("dispatch thread exited without signalling startup");

            if let Err(e) = outcome {
                error!("failed to get realtime priorities: {e}");
                handle.join().expect("dispatch thread cannot be joined");
                return Err(RtError::Elevation(e));
            }
            self.thread = Some(handle);
        }

        for device in &self.devices {
            device.start();
        }
        Ok(())
    }

    /// Stop real-time handling previously started by `start()`.
    ///
    /// Flags termination, halts each device's data flow in registration
    /// order, then joins the dispatch thread if one was spawned. Device
    /// `stop()` is required to make any in-flight dispatch wait ready,
    /// so the join cannot hang (see `Device::stop`).
    pub fn stop(&mut self) {
        guard::check_blocking_allowed();
        self.shared.terminated.store(true, Ordering::Release);

        // Stop audio rolling on devices.
        for device in &self.devices {
            device.stop();
        }

        if let Some(handle) = self.thread.take() {
            handle.join().expect("dispatch thread cannot be joined");
            if self.shared.poll_fault.load(Ordering::Acquire) {
                warn!("dispatch loop had already ended after a wait failure");
            }
        }
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of registered controllers.
    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Number of captured wait descriptors, across all devices.
    pub fn poll_entry_count(&self) -> usize {
        self.table.len()
    }

    /// The captured wait descriptors, in device-registration order.
    pub fn poll_entries(&self) -> &[PollEntry] {
        self.table.entries()
    }

    /// True while a dispatch thread is alive and unjoined.
    pub fn dispatch_spawned(&self) -> bool {
        self.thread.is_some()
    }

    /// Completed dispatch cycles since start.
    pub fn wakes(&self) -> u64 {
        self.shared.wakes.load(Ordering::Relaxed)
    }

    /// True when the dispatch loop ended on a non-benign wait failure.
    pub fn poll_fault(&self) -> bool {
        self.shared.poll_fault.load(Ordering::Acquire)
    }
}

impl Default for RtController {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the dispatch thread owns; moved into the thread at spawn.
struct Dispatch {
    entries: PollTable,
    devices: heapless::Vec<Arc<dyn Device>, DEVICE_CAPACITY>,
    controllers: heapless::Vec<Arc<dyn Controller>, CONTROLLER_CAPACITY>,
    shared: Arc<Shared>,
    elevator: Elevator,
    waiter: Waiter,
}

impl Dispatch {
    /// The real-time thread body.
    fn run(mut self, ready: mpsc::SyncSender<Result<(), ElevationError>>) {
        let outcome = (self.elevator)();
        match &outcome {
            Ok(()) => guard::enter_realtime(),
            Err(_) => {
                // Never run a dispatch cycle without elevation; the
                // starting thread treats this as a failed start.
                self.shared.terminated.store(true, Ordering::Release);
            }
        }

        // Report exactly once, success or failure, so the starting
        // thread is never left blocked on the handshake.
        if ready.send(outcome).is_err() {
            error!("startup handshake receiver vanished");
            std::process::abort();
        }

        while !self.shared.terminated.load(Ordering::Acquire) {
            match (self.waiter)(self.entries.entries_mut()) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Ends dispatch without terminating the session;
                    // stop() still joins, but audio has gone quiet.
                    error!("dispatch wait failed: {e}");
                    self.shared.poll_fault.store(true, Ordering::Release);
                    return;
                }
            }

            // Controllers first: control input must be visible to the
            // devices serviced within the same cycle.
            for controller in &self.controllers {
                controller.handle();
            }
            for device in &self.devices {
                device.handle();
            }

            self.shared.wakes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::RawFd;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Self-threaded device: contributes no descriptors, records its
    /// start calls in an optional shared order log.
    struct NullDevice {
        name: &'static str,
        starts: AtomicUsize,
        log: Option<Arc<Mutex<Vec<&'static str>>>>,
    }

    impl NullDevice {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                starts: AtomicUsize::new(0),
                log: None,
            }
        }

        fn logged(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                starts: AtomicUsize::new(0),
                log: Some(log),
            }
        }
    }

    impl Device for NullDevice {
        fn name(&self) -> &str {
            self.name
        }

        fn poll_fds(&self, _table: &mut PollTable) -> Result<usize, DeviceError> {
            Ok(0)
        }

        fn handle(&self) {}

        fn start(&self) {
            self.starts.fetch_add(1, Ordering::Relaxed);
            if let Some(log) = &self.log {
                log.lock().unwrap().push(self.name);
            }
        }

        fn stop(&self) {}
    }

    struct FixedDevice {
        fds: Vec<RawFd>,
    }

    impl Device for FixedDevice {
        fn name(&self) -> &str {
            "fixed"
        }

        fn poll_fds(&self, table: &mut PollTable) -> Result<usize, DeviceError> {
            for fd in &self.fds {
                table.push(PollEntry::readable(*fd))?;
            }
            Ok(self.fds.len())
        }

        fn handle(&self) {}
        fn start(&self) {}
        fn stop(&self) {}
    }

    struct SamplingPanel;

    impl Controller for SamplingPanel {
        fn name(&self) -> &str {
            "panel"
        }

        fn handle(&self) {}
    }

    #[test]
    fn device_capacity_is_enforced() {
        let mut rt = RtController::new();
        for _ in 0..DEVICE_CAPACITY {
            rt.add_device(Arc::new(NullDevice::new("deck"))).unwrap();
        }

        let err = rt.add_device(Arc::new(NullDevice::new("extra"))).unwrap_err();
        assert!(matches!(err, RtError::TooManyDevices { capacity } if capacity == DEVICE_CAPACITY));
        assert_eq!(rt.device_count(), DEVICE_CAPACITY);
    }

    #[test]
    fn controller_capacity_is_enforced() {
        let mut rt = RtController::new();
        for _ in 0..CONTROLLER_CAPACITY {
            rt.add_controller(Arc::new(SamplingPanel)).unwrap();
        }

        let err = rt.add_controller(Arc::new(SamplingPanel)).unwrap_err();
        assert!(
            matches!(err, RtError::TooManyControllers { capacity } if capacity == CONTROLLER_CAPACITY)
        );
        assert_eq!(rt.controller_count(), CONTROLLER_CAPACITY);
    }

    #[test]
    fn descriptors_flatten_in_registration_order() {
        let mut rt = RtController::new();
        rt.add_device(Arc::new(FixedDevice { fds: vec![10, 11] }))
            .unwrap();
        rt.add_device(Arc::new(FixedDevice {
            fds: vec![20, 21, 22],
        }))
        .unwrap();

        assert_eq!(rt.poll_entry_count(), 5);
        let fds: Vec<RawFd> = rt.poll_entries().iter().map(|e| e.fd()).collect();
        assert_eq!(fds, vec![10, 11, 20, 21, 22]);
    }

    #[test]
    fn failed_descriptor_capture_rolls_back() {
        // 30 entries leave room for two more; a device asking for three
        // must fail and leave both tables untouched.
        let mut rt = RtController::new();
        rt.add_device(Arc::new(FixedDevice {
            fds: (0..30).collect(),
        }))
        .unwrap();

        let err = rt
            .add_device(Arc::new(FixedDevice {
                fds: vec![90, 91, 92],
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            RtError::Descriptors(DeviceError::TableFull { .. })
        ));
        assert_eq!(rt.device_count(), 1);
        assert_eq!(rt.poll_entry_count(), 30);
    }

    #[test]
    fn start_without_descriptors_starts_devices_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(NullDevice::logged("first", log.clone()));
        let second = Arc::new(NullDevice::logged("second", log.clone()));

        let mut rt = RtController::new();
        rt.add_device(first.clone()).unwrap();
        rt.add_device(second.clone()).unwrap();

        rt.start().unwrap();
        assert!(!rt.dispatch_spawned());
        assert_eq!(first.starts.load(Ordering::Relaxed), 1);
        assert_eq!(second.starts.load(Ordering::Relaxed), 1);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);

        rt.stop();
    }

    #[test]
    #[should_panic(expected = "registered before start")]
    fn registration_after_start_panics() {
        let mut rt = RtController::new();
        rt.start().unwrap();
        let _ = rt.add_device(Arc::new(NullDevice::new("late")));
    }

    #[test]
    #[should_panic(expected = "single-use")]
    fn double_start_panics() {
        let mut rt = RtController::new();
        rt.start().unwrap();
        let _ = rt.start();
    }
}
