use std::fmt;
use std::time::Duration;

/// The signals that can be sent to a [`Timer`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Signal {
    /// Arm the timer, replacing any countdown already running
    Start { id: TimerId, delay: Duration },
    /// Disarm the timer without firing
    Stop,
    /// Terminate whole timer thread
    Terminate,
}

/// Identifies one arming of the off-timer, so a late expiry can be told apart from the live one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer #{}", self.0)
    }
}

/// The commands executed, one at a time and in order, by the command worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerCommand {
    TurnOn,
    /// `timer` is set when the command was produced by an expiring off-timer
    TurnOff { timer: Option<TimerId> },
    CancelOffTimer,
    StartOffTimer,
}

/// Sentence tag emitted by the mmWave sensor
pub const SENTENCE_TAG: &str = "$JYBSS";
/// Sensor counts as disconnected if no valid sentence arrived for this long
pub const STALE_AFTER: Duration = Duration::from_secs(5);
/// How long to wait for the first sensor reading at startup
pub const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(3);
/// How long the worker blocks on the queue before re-checking its running flag
pub const QUEUE_POLL: Duration = Duration::from_millis(200);
/// Consecutive read errors before the serial link is reopened
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Bounded wait for the sensor reader thread at shutdown
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Bounded wait for the command worker thread at shutdown
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// The timeout for UDP socket read and write
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

pub mod error;
pub use error::Error;

pub mod config;
pub use config::{Config, ControlSettings};

pub mod protocol;

pub mod presence;
pub use presence::{Edge, PresenceHandler, SensorStatus};

pub mod lifecycle;

pub mod uart;
pub mod gpio;

pub mod timer;
pub use timer::Timer;

pub mod queue;
pub mod machine;

pub mod backend;
pub use backend::PowerBackend;

pub mod lifx;
pub mod cec;

pub mod controller;
pub use controller::Controller;
