//! Integration test: simulated decks under the live dispatch loop.
//!
//! Wires the real `RtController` to `SimDeck`/`SimPanel`, validating
//! that the timer descriptors drive dispatch cycles, that panel input is
//! consumed by the loop, and that the eventfd wake-on-stop path lets a
//! session shut down without deadlock.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use platter_engine::drivers::simulation::{SimDeck, SimPanel};
use platter_rt::RtController;

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn deck_session_ticks_and_shuts_down() {
    let deck = Arc::new(SimDeck::new(0, Duration::from_millis(1)).unwrap());
    let panel = Arc::new(SimPanel::new());

    let mut rt = RtController::new();
    rt.add_device(deck.clone()).unwrap();
    rt.add_controller(panel.clone()).unwrap();
    assert_eq!(rt.poll_entry_count(), 2);

    rt.start().unwrap();
    assert!(rt.dispatch_spawned());
    assert!(deck.is_rolling());

    panel.nudge(5);
    assert!(wait_until(Duration::from_secs(5), || deck.ticks() >= 3));
    assert!(wait_until(Duration::from_secs(5), || panel.applied() == 5));

    rt.stop();

    assert!(!rt.dispatch_spawned());
    assert!(!deck.is_rolling());
    assert!(panel.samples() >= 3);
    assert!(!rt.poll_fault());
}

#[test]
fn two_decks_share_one_dispatch_thread() {
    let left = Arc::new(SimDeck::new(0, Duration::from_millis(1)).unwrap());
    let right = Arc::new(SimDeck::new(1, Duration::from_millis(2)).unwrap());

    let mut rt = RtController::new();
    rt.add_device(left.clone()).unwrap();
    rt.add_device(right.clone()).unwrap();
    assert_eq!(rt.poll_entry_count(), 4);

    rt.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        left.ticks() >= 2 && right.ticks() >= 2
    }));

    rt.stop();
    assert!(!left.is_rolling());
    assert!(!right.is_rolling());
}
