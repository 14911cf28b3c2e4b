//! Error type shared by the sensor readers, the command queue and the backends

use std::fmt;
use std::io;

use crate::PowerCommand;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Serial(serialport::Error),
    Gpio(gpio_cdev::Error),
    Lifx(lifx_core::Error),
    /// `cec-client` could not be run or did not finish in time
    Cec(String),
    /// Configuration is invalid
    Config(String),
    /// The command queue is at capacity, the command was dropped
    QueueFull(PowerCommand),
    /// The worker side of the queue is gone
    QueueClosed,
    AlreadyStarted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Serial(e) => write!(f, "serial: {e}"),
            Self::Gpio(e) => write!(f, "gpio: {e}"),
            Self::Lifx(e) => write!(f, "lifx: {e}"),
            Self::Cec(msg) => write!(f, "cec: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::QueueFull(command) => write!(f, "command queue full, dropped {command:?}"),
            Self::QueueClosed => write!(f, "command queue closed"),
            Self::AlreadyStarted => write!(f, "controller already started"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serial(e) => Some(e),
            Self::Gpio(e) => Some(e),
            Self::Lifx(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Self::Serial(e)
    }
}

impl From<gpio_cdev::Error> for Error {
    fn from(e: gpio_cdev::Error) -> Self {
        Self::Gpio(e)
    }
}

impl From<lifx_core::Error> for Error {
    fn from(e: lifx_core::Error) -> Self {
        Self::Lifx(e)
    }
}
