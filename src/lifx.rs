use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use lifx_core::{BuildOptions, Message, RawMessage};
use log::{debug, warn};

use crate::backend::PowerBackend;
use crate::Error;

/// Power level of a LIFX device that is switched on
const LEVEL_ON: u16 = u16::MAX;
/// Power level of a LIFX device that is switched off
const LEVEL_OFF: u16 = u16::MIN;

/// Replies to skip while waiting for a power state
const MAX_UNRELATED_REPLIES: usize = 4;

/// A LIFX switch or smart plug that the TV is powered from
#[derive(Debug)]
pub struct LifxPlug {
    pub device: SocketAddr,
    pub socket: UdpSocket,
    pub options: BuildOptions,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl LifxPlug {
    /// Create new plug with ip address `device` (see [`ToSocketAddrs`])
    pub fn new<A: ToSocketAddrs>(device: A) -> Result<Self, Error> {
        let device = device.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Config("LIFX address does not resolve".to_string())
        })?;
        let local = if device.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        socket.connect(device)?;
        socket.set_read_timeout(Some(crate::SOCKET_TIMEOUT))?;
        socket.set_write_timeout(Some(crate::SOCKET_TIMEOUT))?;
        let options = BuildOptions::default();

        Ok(Self {
            device,
            socket,
            options,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, Error> {
        // A zero timeout means "block forever" to the socket
        let timeout = Some(timeout.max(Duration::from_millis(1)));
        self.socket.set_read_timeout(timeout)?;
        self.socket.set_write_timeout(timeout)?;
        Ok(self)
    }

    /// Get [`RawMessage`] from [`Message`]
    pub fn raw_message(&self, message: Message) -> Result<RawMessage, Error> {
        Ok(RawMessage::build(&self.options, message)?)
    }

    /// Send `message` to the device
    pub fn send(&self, message: Message) -> Result<(), Error> {
        let bytes = self.raw_message(message)?.pack()?;
        self.socket.send(&bytes)?;
        Ok(())
    }

    /// Wait for the next message from the device
    pub fn receive(&self) -> Result<Message, Error> {
        let mut buffer = [0u8; 512];
        let len = self.socket.recv(&mut buffer)?;
        let raw = RawMessage::unpack(&buffer[..len])?;
        Ok(Message::from_raw(&raw)?)
    }

    /// Current power level reported by the device
    pub fn level(&self) -> Result<u16, Error> {
        self.send(Message::LightGetPower)?;
        for _ in 0..MAX_UNRELATED_REPLIES {
            match self.receive()? {
                Message::LightStatePower { level } => return Ok(level),
                other => debug!("Ignoring LIFX reply {:?}", other),
            }
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no power state in LIFX replies",
        )))
    }

    /// Set the power and confirm it took, retrying on failure
    fn set_power(&self, on: bool) -> Result<bool, Error> {
        let level = if on { LEVEL_ON } else { LEVEL_OFF };
        for attempt in 1..=self.retry_attempts {
            let confirmed = self
                .send(Message::LightSetPower { level, duration: 0 })
                .and_then(|()| self.level());
            match confirmed {
                Ok(current) if (current > LEVEL_OFF) == on => return Ok(true),
                Ok(current) => warn!(
                    "LIFX power level {} after attempt {}/{}",
                    current, attempt, self.retry_attempts
                ),
                Err(e) => warn!(
                    "LIFX power attempt {}/{} failed: {}",
                    attempt, self.retry_attempts, e
                ),
            }
            if attempt < self.retry_attempts {
                thread::sleep(self.retry_delay);
            }
        }
        Ok(false)
    }
}

impl PowerBackend for LifxPlug {
    fn power_on(&mut self) -> Result<bool, Error> {
        self.set_power(true)
    }

    fn power_off(&mut self) -> Result<bool, Error> {
        self.set_power(false)
    }

    fn power_state(&mut self) -> Result<Option<bool>, Error> {
        match self.level() {
            Ok(level) => Ok(Some(level > LEVEL_OFF)),
            Err(Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                debug!("LIFX device did not answer: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
