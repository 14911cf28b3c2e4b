//! Serial reader for the mmWave presence sensor
//!
//! One thread owns the port and the [`SensorState`]. It decodes sentences,
//! hands presence edges to the [`PresenceHandler`] and reopens the port
//! after repeated errors.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::config::{seconds, UartConfig};
use crate::lifecycle::Background;
use crate::presence::SensorState;
use crate::protocol::{self, DecodeError, Decoder, LineAssembler};
use crate::{Error, PresenceHandler, SensorStatus};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Decoding state of one serial session, independent of the port itself
#[derive(Debug, Default)]
pub struct Session {
    decoder: Decoder,
    assembler: LineAssembler,
    pub state: SensorState,
    consecutive_errors: u32,
    status: Option<Arc<SensorStatus>>,
}

impl Session {
    /// A session that keeps `status` up to date
    pub fn publishing(status: Arc<SensorStatus>) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Process freshly read bytes, dispatching any edges to `handler`
    ///
    /// The new state is published before an edge is dispatched, so anyone
    /// who sees the edge's commands also sees the presence behind them.
    pub fn feed(&mut self, bytes: &[u8], now: Instant, handler: &dyn PresenceHandler) {
        for line in self.assembler.push(bytes) {
            match self.decoder.decode(&line, now) {
                Ok(Some(event)) => {
                    self.consecutive_errors = 0;
                    let edge = self.state.observe(event);
                    self.publish();
                    if let Some(edge) = edge {
                        edge.dispatch(handler);
                    }
                }
                Ok(None) => debug!("Ignoring line {:?}", String::from_utf8_lossy(&line)),
                Err(DecodeError::Malformed) => {
                    debug!("Dropping malformed sentence {:?}", String::from_utf8_lossy(&line));
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    warn!(
                        "Failed to parse sensor data {:?}: {} ({}/{})",
                        String::from_utf8_lossy(&line),
                        e,
                        self.consecutive_errors,
                        crate::MAX_CONSECUTIVE_ERRORS
                    );
                }
            }
        }
    }

    /// Refresh liveness and publish, whether or not the port is open
    pub fn tick(&mut self, now: Instant) {
        self.state.refresh_liveness(now);
        self.publish();
    }

    fn publish(&self) {
        if let Some(status) = &self.status {
            status.publish(&self.state);
        }
    }

    /// Count a transport error, true once a reconnect is due
    pub fn read_failed(&mut self) -> bool {
        self.consecutive_errors += 1;
        self.consecutive_errors >= crate::MAX_CONSECUTIVE_ERRORS
    }

    pub fn reconnect_due(&self) -> bool {
        self.consecutive_errors >= crate::MAX_CONSECUTIVE_ERRORS
    }

    /// Forget buffered partial input
    pub fn discard(&mut self) {
        self.assembler.clear();
    }

    /// Start over after the port was reopened
    pub fn reset(&mut self) {
        self.assembler.clear();
        self.state.reset_baseline();
        self.consecutive_errors = 0;
    }
}

/// Open the serial port 8N1
pub fn open(config: &UartConfig) -> Result<Box<dyn SerialPort>, Error> {
    let port = serialport::new(config.port.as_str(), config.baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(seconds("sensor.uart.timeout", config.timeout)?)
        .open()?;
    info!(
        "Connected to sensor on {} at {} baud",
        config.port, config.baudrate
    );
    Ok(port)
}

pub struct UartReader {
    config: UartConfig,
    handler: Arc<dyn PresenceHandler>,
    status: Arc<SensorStatus>,
    running: Arc<AtomicBool>,
}

impl UartReader {
    /// Open the port and start the reader thread
    pub fn start(
        config: UartConfig,
        handler: Arc<dyn PresenceHandler>,
        status: Arc<SensorStatus>,
    ) -> Result<Background, Error> {
        let port = open(&config)?;
        let running = Arc::new(AtomicBool::new(false));
        let reader = Self {
            config,
            handler,
            status,
            running: Arc::clone(&running),
        };
        let background = Background::spawn("uart-reader", running, move || reader.run(port))?;
        info!("Started sensor monitoring");
        Ok(background)
    }

    fn run(self, port: Box<dyn SerialPort>) {
        let mut port = Some(port);
        let mut session = Session::publishing(Arc::clone(&self.status));
        let mut buffer = [0u8; 256];

        while self.running.load(Ordering::SeqCst) {
            if port.is_none() {
                session.tick(Instant::now());
                thread::sleep(RECONNECT_DELAY);
                match open(&self.config) {
                    Ok(reopened) => port = Some(reopened),
                    Err(e) => error!("Failed to reconnect to sensor: {}", e),
                }
                continue;
            }
            let Some(serial) = port.as_mut() else {
                continue;
            };

            if self.status.take_discard_request() {
                discard_input(&mut **serial);
                session.discard();
            }

            match serial.read(&mut buffer) {
                Ok(0) => {}
                Ok(len) => session.feed(&buffer[..len], Instant::now(), self.handler.as_ref()),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    let due = session.read_failed();
                    warn!("Read error: {}", e);
                    if !due {
                        thread::sleep(ERROR_BACKOFF);
                    }
                }
            }

            if session.reconnect_due() {
                error!("Too many consecutive errors, attempting reconnection");
                port = None;
                session.reset();
            }

            session.tick(Instant::now());
        }
        self.status.set_connected(false);
        info!("Stopped sensor monitoring");
    }
}

fn discard_input(port: &mut dyn SerialPort) {
    match port.bytes_to_read() {
        Ok(0) => {}
        Ok(pending) => {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                warn!("Failed to flush serial buffer: {}", e);
            } else {
                debug!("Flushed {} bytes from serial buffer", pending);
            }
        }
        Err(e) => warn!("Failed to flush serial buffer: {}", e),
    }
}

/// Store a new detection range in the sensor, for `--configure-range`
pub fn configure_range(config: &UartConfig, min_meters: f64, max_meters: f64) -> Result<(), Error> {
    let commands = protocol::range_commands(min_meters, max_meters)?;
    let mut port = open(config)?;
    info!("Configuring range: {}m to {}m", min_meters, max_meters);
    for command in commands {
        debug!("Sending command: {}", command);
        port.write_all(format!("{command}\r\n").as_bytes())?;
        port.flush()?;
        thread::sleep(Duration::from_secs(1));
        let pending = port.bytes_to_read()? as usize;
        if pending > 0 {
            let mut response = vec![0u8; pending];
            port.read_exact(&mut response)?;
            debug!("Command response: {}", String::from_utf8_lossy(&response).trim());
        }
    }
    info!("Range configured: {}m to {}m", min_meters, max_meters);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Edge;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Edges(Mutex<Vec<Edge>>);

    impl PresenceHandler for Edges {
        fn on_presence_detected(&self) {
            self.0.lock().unwrap().push(Edge::Detected);
        }
        fn on_presence_lost(&self) {
            self.0.lock().unwrap().push(Edge::Lost);
        }
    }

    impl Edges {
        fn take(&self) -> Vec<Edge> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    #[test]
    fn test_sentence_stream_edges() {
        let edges = Edges::default();
        let mut session = Session::default();
        let now = Instant::now();

        session.feed(b"$JYBSS,0,,,*\n", now, &edges);
        assert!(edges.take().is_empty());
        session.feed(b"$JYBSS,1,,,*\n", now, &edges);
        assert_eq!(edges.take(), vec![Edge::Detected]);
        session.feed(b"$JYBSS,1,,,*\n", now, &edges);
        assert!(edges.take().is_empty());
        session.feed(b"$JYBSS,0,,,*\n", now, &edges);
        assert_eq!(edges.take(), vec![Edge::Lost]);
    }

    #[test]
    fn test_noise_does_not_stop_decoding() {
        let edges = Edges::default();
        let mut session = Session::default();
        let now = Instant::now();

        session.feed(b"$JYBSS,0,,,*\r\n\xff\xfe\n$JYB", now, &edges);
        session.feed(b"SS,1,,,*\nleapMMW:/>\n", now, &edges);
        assert_eq!(edges.take(), vec![Edge::Detected]);
        assert!(!session.reconnect_due());
    }

    #[test]
    fn test_repeated_errors_request_reconnect() {
        let edges = Edges::default();
        let mut session = Session::default();
        for _ in 0..crate::MAX_CONSECUTIVE_ERRORS - 1 {
            assert!(!session.read_failed());
        }
        session.feed(b"\xff\n", Instant::now(), &edges);
        assert!(session.reconnect_due());
    }

    #[test]
    fn test_malformed_sentence_is_not_an_error() {
        let edges = Edges::default();
        let mut session = Session::default();
        for _ in 0..crate::MAX_CONSECUTIVE_ERRORS * 2 {
            session.feed(b"$JYBSS\n", Instant::now(), &edges);
        }
        assert!(!session.reconnect_due());
    }

    /// Records the published presence at the moment each edge arrives
    struct Snapshots {
        status: Arc<SensorStatus>,
        seen: Mutex<Vec<Option<bool>>>,
    }

    impl PresenceHandler for Snapshots {
        fn on_presence_detected(&self) {
            self.seen.lock().unwrap().push(self.status.presence());
        }
        fn on_presence_lost(&self) {
            self.seen.lock().unwrap().push(self.status.presence());
        }
    }

    #[test]
    fn test_state_is_published_before_edge() {
        let status = Arc::new(SensorStatus::new());
        let handler = Snapshots {
            status: Arc::clone(&status),
            seen: Mutex::new(Vec::new()),
        };
        let mut session = Session::publishing(Arc::clone(&status));
        let now = Instant::now();

        session.feed(b"$JYBSS,0,,,*\n", now, &handler);
        assert_eq!(status.presence(), Some(false));
        session.feed(b"$JYBSS,1,,,*\n$JYBSS,0,,,*\n", now, &handler);
        assert_eq!(*handler.seen.lock().unwrap(), vec![Some(true), Some(false)]);
    }

    #[test]
    fn test_silent_sensor_is_published_disconnected() {
        let edges = Edges::default();
        let status = Arc::new(SensorStatus::new());
        let mut session = Session::publishing(Arc::clone(&status));
        let now = Instant::now();

        session.feed(b"$JYBSS,1,,,*\n", now, &edges);
        assert!(status.is_connected());
        // port dropped for reconnection, nothing arrives any more
        session.reset();
        session.tick(now + Duration::from_secs(1));
        assert!(status.is_connected());
        session.tick(now + crate::STALE_AFTER + Duration::from_secs(1));
        assert!(!status.is_connected());
        assert_eq!(status.presence(), Some(true));
    }

    #[test]
    fn test_reset_reseeds_presence() {
        let edges = Edges::default();
        let mut session = Session::default();
        let now = Instant::now();
        session.feed(b"$JYBSS,0,,,*\n", now, &edges);
        session.reset();
        session.feed(b"$JYBSS,1,,,*\n", now, &edges);
        assert!(edges.take().is_empty());
        assert!(session.state.presence);
    }
}
