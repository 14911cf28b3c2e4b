//! Daemon configuration, loaded from a JSON file
//!
//! Every field has a default, so a partial file (or `{}`) is valid.
//! Durations are given in seconds as floats.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorConfig,
    pub tv_control: TvControlConfig,
    pub dev_mode: DevModeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    /// mmWave sensor sentences over a serial link
    #[default]
    Uart,
    /// Sensor output pin polled through the GPIO character device
    Trigger,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub mode: SensorMode,
    pub uart: UartConfig,
    pub trigger: TriggerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    pub port: String,
    pub baudrate: u32,
    /// Serial read timeout
    pub timeout: f64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA1".to_string(),
            baudrate: 115_200,
            timeout: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub chip: String,
    pub gpio_pin: u32,
    /// Minimum time between accepted transitions of the same kind
    pub debounce_time: f64,
    /// Sensor pulls the line low on presence
    pub inverted_logic: bool,
    pub poll_interval: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_string(),
            gpio_pin: 17,
            debounce_time: 2.0,
            inverted_logic: false,
            poll_interval: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TvControlConfig {
    pub turn_off_delay: f64,
    /// Pause after a TV operation before the sensor is consulted again
    pub settle_time: f64,
    pub queue_capacity: usize,
    pub backend: BackendConfig,
}

impl Default for TvControlConfig {
    fn default() -> Self {
        Self {
            turn_off_delay: 300.0,
            settle_time: 0.5,
            queue_capacity: 16,
            backend: BackendConfig::default(),
        }
    }
}

/// Which TV power backend to build, and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// LIFX switch or plug feeding the TV
    Lifx {
        address: String,
        #[serde(default = "default_retry_attempts")]
        retry_attempts: u32,
        #[serde(default = "default_retry_delay")]
        retry_delay: f64,
        #[serde(default = "default_lifx_timeout")]
        timeout: f64,
    },
    /// HDMI-CEC through `cec-client`
    Cec {
        #[serde(default)]
        device: u8,
        #[serde(default = "default_cooldown")]
        cooldown_period: f64,
        #[serde(default = "default_cec_timeout")]
        timeout: f64,
    },
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    2.0
}

fn default_lifx_timeout() -> f64 {
    2.0
}

fn default_cooldown() -> f64 {
    25.0
}

fn default_cec_timeout() -> f64 {
    5.0
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Lifx {
            address: "192.168.1.11:56700".to_string(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            timeout: default_lifx_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevModeConfig {
    /// Track power state without touching the backend
    pub dry_run: bool,
    /// Log a status line every second
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Runtime parameters of the power state machine and its worker
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    pub turn_off_delay: Duration,
    pub settle_time: Duration,
    pub queue_capacity: usize,
    pub dry_run: bool,
    pub reader_join_timeout: Duration,
    pub worker_join_timeout: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            turn_off_delay: Duration::from_secs(300),
            settle_time: Duration::from_millis(500),
            queue_capacity: 16,
            dry_run: false,
            reader_join_timeout: crate::READER_JOIN_TIMEOUT,
            worker_join_timeout: crate::WORKER_JOIN_TIMEOUT,
        }
    }
}

impl Config {
    /// Read and validate the config file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let config: Config =
            serde_json::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        seconds("sensor.uart.timeout", self.sensor.uart.timeout)?;
        seconds("sensor.trigger.debounce_time", self.sensor.trigger.debounce_time)?;
        seconds("sensor.trigger.poll_interval", self.sensor.trigger.poll_interval)?;
        seconds("tv_control.turn_off_delay", self.tv_control.turn_off_delay)?;
        seconds("tv_control.settle_time", self.tv_control.settle_time)?;
        if self.tv_control.queue_capacity == 0 {
            return Err(Error::Config(
                "tv_control.queue_capacity must be at least 1".to_string(),
            ));
        }
        match &self.tv_control.backend {
            BackendConfig::Lifx {
                retry_delay,
                timeout,
                ..
            } => {
                seconds("backend.retry_delay", *retry_delay)?;
                seconds("backend.timeout", *timeout)?;
            }
            BackendConfig::Cec {
                cooldown_period,
                timeout,
                ..
            } => {
                seconds("backend.cooldown_period", *cooldown_period)?;
                seconds("backend.timeout", *timeout)?;
            }
        }
        Ok(())
    }

    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            turn_off_delay: Duration::from_secs_f64(self.tv_control.turn_off_delay),
            settle_time: Duration::from_secs_f64(self.tv_control.settle_time),
            queue_capacity: self.tv_control.queue_capacity,
            dry_run: self.dev_mode.dry_run,
            ..ControlSettings::default()
        }
    }
}

/// Convert a validated seconds value, `Duration::from_secs_f64` panics on negatives
pub fn seconds(name: &str, value: f64) -> Result<Duration, Error> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Config(format!("{name} must be a non-negative number of seconds")))
}
