//! Turning raw sensor readings into presence edges
//!
//! [`SensorState`] serves the serial sensor: the first reading after a
//! (re)connection only seeds the state, later readings produce an edge when
//! they differ from it. [`Debouncer`] serves the polled GPIO pin and also
//! rejects transitions that follow the previous one of the same kind too
//! closely.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::protocol::PresenceEvent;

/// A genuine change of presence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Detected,
    Lost,
}

impl Edge {
    /// Deliver the edge to `handler` on the calling thread
    pub fn dispatch(self, handler: &dyn PresenceHandler) {
        match self {
            Edge::Detected => handler.on_presence_detected(),
            Edge::Lost => handler.on_presence_lost(),
        }
    }
}

/// Receives presence edges from a sensor reader thread
///
/// Implementations are called on the reader thread and must return
/// immediately: enqueue work, never wait on I/O.
pub trait PresenceHandler: Send + Sync {
    fn on_presence_detected(&self);
    fn on_presence_lost(&self);
}

/// State of the serial sensor, owned by its reader thread
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorState {
    pub connected: bool,
    pub presence: bool,
    pub last_update: Option<Instant>,
    pub first_reading_done: bool,
}

impl SensorState {
    /// Record a decoded reading, returning the edge it causes, if any
    pub fn observe(&mut self, event: PresenceEvent) -> Option<Edge> {
        self.last_update = Some(event.timestamp);
        self.connected = true;

        if !self.first_reading_done {
            self.first_reading_done = true;
            self.presence = event.present;
            debug!(
                "First sensor reading: {}",
                if event.present { "PRESENT" } else { "ABSENT" }
            );
            return None;
        }

        if event.present == self.presence {
            return None;
        }
        debug!("State change: {} -> {}", self.presence, event.present);
        self.presence = event.present;
        Some(if event.present {
            info!("Presence detected");
            Edge::Detected
        } else {
            info!("Presence lost");
            Edge::Lost
        })
    }

    /// The next reading re-seeds the state instead of being compared
    pub fn reset_baseline(&mut self) {
        self.first_reading_done = false;
    }

    /// Mark the sensor disconnected when no valid sentence arrived recently
    pub fn refresh_liveness(&mut self, now: Instant) {
        self.connected = self
            .last_update
            .is_some_and(|last| now.saturating_duration_since(last) < crate::STALE_AFTER);
    }
}

/// Edge detection with a per-kind debounce window, for a polled pin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Debouncer {
    window: Duration,
    last_raw: bool,
    presence: bool,
    last_detected: Option<Instant>,
    last_lost: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_raw: false,
            presence: false,
            last_detected: None,
            last_lost: None,
        }
    }

    pub fn presence(&self) -> bool {
        self.presence
    }

    /// Feed one poll of the pin
    pub fn poll(&mut self, raw: bool, now: Instant) -> Option<Edge> {
        if raw == self.last_raw {
            return None;
        }
        self.last_raw = raw;

        let window = self.window;
        let last = if raw {
            &mut self.last_detected
        } else {
            &mut self.last_lost
        };
        if last.is_some_and(|at| now.saturating_duration_since(at) < window) {
            debug!("Ignoring {} within debounce window", if raw { "rise" } else { "fall" });
            return None;
        }
        *last = Some(now);

        if raw == self.presence {
            return None;
        }
        self.presence = raw;
        Some(if raw { Edge::Detected } else { Edge::Lost })
    }
}

const UNKNOWN: u8 = 0;
const ABSENT: u8 = 1;
const PRESENT: u8 = 2;

/// What the reader thread publishes for the rest of the daemon
///
/// Written only by the reader thread, apart from the discard request,
/// which the command worker raises and the reader consumes.
#[derive(Debug, Default)]
pub struct SensorStatus {
    presence: AtomicU8,
    connected: AtomicBool,
    discard_requested: AtomicBool,
}

impl SensorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known presence, `None` before the first reading
    pub fn presence(&self) -> Option<bool> {
        match self.presence.load(Ordering::Acquire) {
            PRESENT => Some(true),
            ABSENT => Some(false),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_presence(&self, presence: Option<bool>) {
        let value = match presence {
            Some(true) => PRESENT,
            Some(false) => ABSENT,
            None => UNKNOWN,
        };
        self.presence.store(value, Ordering::Release);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Copy the reader's state out
    pub fn publish(&self, state: &SensorState) {
        self.set_connected(state.connected);
        if state.first_reading_done {
            self.set_presence(Some(state.presence));
        }
    }

    /// Ask the reader to throw away buffered input
    pub fn discard_stale_input(&self) {
        self.discard_requested.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn discard_pending(&self) -> bool {
        self.discard_requested.load(Ordering::Acquire)
    }

    /// Consume a pending discard request
    pub fn take_discard_request(&self) -> bool {
        self.discard_requested.swap(false, Ordering::AcqRel)
    }

    /// Wait for the reader to establish the initial presence
    pub fn wait_for_first_reading(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(presence) = self.presence() {
                return Some(presence);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}
