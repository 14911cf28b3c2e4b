//! Polled GPIO variant of the presence sensor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use log::{error, info};

use crate::config::{seconds, TriggerConfig};
use crate::lifecycle::Background;
use crate::presence::Debouncer;
use crate::{Error, PresenceHandler, SensorStatus};

const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Map a raw line value to presence
pub fn level_to_presence(value: u8, inverted: bool) -> bool {
    if inverted {
        value == 0
    } else {
        value == 1
    }
}

pub struct GpioReader {
    line: LineHandle,
    inverted: bool,
    poll_interval: Duration,
    debouncer: Debouncer,
    handler: Arc<dyn PresenceHandler>,
    status: Arc<SensorStatus>,
    running: Arc<AtomicBool>,
}

impl GpioReader {
    /// Claim the sensor line and start polling it
    pub fn start(
        config: &TriggerConfig,
        handler: Arc<dyn PresenceHandler>,
        status: Arc<SensorStatus>,
    ) -> Result<Background, Error> {
        let mut chip = Chip::new(&config.chip)?;
        // Error will appear here if line is occupied
        let line = chip
            .get_line(config.gpio_pin)?
            .request(LineRequestFlags::INPUT, 0, "presence-tv")?;
        let current = line.get_value()?;
        info!(
            "GPIO sensor on {} line {} (current: {})",
            config.chip, config.gpio_pin, current
        );

        let running = Arc::new(AtomicBool::new(false));
        let reader = Self {
            line,
            inverted: config.inverted_logic,
            poll_interval: seconds("sensor.trigger.poll_interval", config.poll_interval)?,
            debouncer: Debouncer::new(seconds(
                "sensor.trigger.debounce_time",
                config.debounce_time,
            )?),
            handler,
            status,
            running: Arc::clone(&running),
        };
        Ok(Background::spawn("gpio-reader", running, move || reader.run())?)
    }

    fn run(mut self) {
        info!("Starting presence monitoring...");
        self.status.set_connected(true);
        self.status.set_presence(Some(self.debouncer.presence()));

        while self.running.load(Ordering::SeqCst) {
            // Nothing is buffered on a GPIO line
            self.status.take_discard_request();
            match self.line.get_value() {
                Ok(value) => {
                    let raw = level_to_presence(value, self.inverted);
                    if let Some(edge) = self.debouncer.poll(raw, Instant::now()) {
                        self.status.set_presence(Some(self.debouncer.presence()));
                        edge.dispatch(self.handler.as_ref());
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    error!("GPIO read error: {}", e);
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
        self.status.set_connected(false);
        info!("Stopped GPIO monitoring");
    }
}
