//! TV power backends
//!
//! A backend is chosen once, at startup, from the config. Calls may block
//! for seconds and are only ever made from the command worker.

use log::info;

use crate::cec::CecClient;
use crate::config::{seconds, BackendConfig};
use crate::lifx::LifxPlug;
use crate::Error;

pub trait PowerBackend: Send {
    /// Turn the TV on, `Ok(false)` if the backend reports failure
    fn power_on(&mut self) -> Result<bool, Error>;
    /// Turn the TV off, `Ok(false)` if the backend reports failure
    fn power_off(&mut self) -> Result<bool, Error>;
    /// Best-effort power state, `None` when it cannot be determined
    fn power_state(&mut self) -> Result<Option<bool>, Error>;
}

/// Build the backend described by `config`
pub fn build(config: &BackendConfig) -> Result<Box<dyn PowerBackend>, Error> {
    match config {
        BackendConfig::Lifx {
            address,
            retry_attempts,
            retry_delay,
            timeout,
        } => {
            let plug = LifxPlug::new(address.as_str())?
                .with_retries(*retry_attempts, seconds("retry_delay", *retry_delay)?)
                .with_timeout(seconds("timeout", *timeout)?)?;
            info!("Using LIFX backend at {}", plug.device);
            Ok(Box::new(plug))
        }
        BackendConfig::Cec {
            device,
            cooldown_period,
            timeout,
        } => {
            let client = CecClient::new(*device)
                .with_cooldown(seconds("cooldown_period", *cooldown_period)?)
                .with_timeout(seconds("timeout", *timeout)?);
            info!("Using CEC backend for logical device {}", device);
            Ok(Box::new(client))
        }
    }
}
