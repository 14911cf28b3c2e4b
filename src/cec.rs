//! HDMI-CEC backend driving `cec-client` in single-command mode

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::backend::PowerBackend;
use crate::Error;

#[derive(Debug, Clone)]
pub struct CecClient {
    /// Logical address of the TV on the CEC bus, normally 0
    pub device: u8,
    program: String,
    timeout: Duration,
    /// Many TVs ignore "on" for a while after entering standby
    cooldown: Duration,
    last_power_off: Option<Instant>,
}

impl CecClient {
    pub fn new(device: u8) -> Self {
        Self {
            device,
            program: "cec-client".to_string(),
            timeout: Duration::from_secs(5),
            cooldown: Duration::from_secs(25),
            last_power_off: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// Time left before a power-on is attempted again
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let off = self.last_power_off?;
        let remaining = self.cooldown.checked_sub(now.saturating_duration_since(off))?;
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Send one command and collect stdout, killing the client after the timeout
    fn run(&self, command: &str) -> Result<(bool, String), Error> {
        debug!("cec-client <- {}", command);
        let mut child = Command::new(&self.program)
            .args(["-s", "-d", "1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "{command}")?;
        }

        let deadline = Instant::now() + self.timeout;
        while child.try_wait()?.is_none() {
            if Instant::now() >= deadline {
                // Already exited between the check and the kill is fine
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Cec(format!(
                    "`{command}` did not finish within {:?}",
                    self.timeout
                )));
            }
            thread::sleep(Duration::from_millis(50));
        }
        let output = child.wait_with_output()?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}

/// Parse the `power status:` line of a `pow` query
pub fn parse_power_status(output: &str) -> Option<bool> {
    let status = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("power status:"))?
        .trim();
    match status {
        "on" => Some(true),
        "standby" | "in transition from on to standby" => Some(false),
        _ => None,
    }
}

impl PowerBackend for CecClient {
    fn power_on(&mut self) -> Result<bool, Error> {
        if let Some(remaining) = self.cooldown_remaining(Instant::now()) {
            info!("CEC cooldown active, {:.1}s remaining", remaining.as_secs_f64());
            return Ok(false);
        }
        let (success, _) = self.run(&format!("on {}", self.device))?;
        if !success {
            warn!("CEC power on failed");
        }
        Ok(success)
    }

    fn power_off(&mut self) -> Result<bool, Error> {
        let (success, _) = self.run(&format!("standby {}", self.device))?;
        if success {
            self.last_power_off = Some(Instant::now());
        } else {
            warn!("CEC standby failed");
        }
        Ok(success)
    }

    fn power_state(&mut self) -> Result<Option<bool>, Error> {
        let (_, output) = self.run(&format!("pow {}", self.device))?;
        Ok(parse_power_status(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_power_status() {
        let on = "opening a connection to the CEC adapter...\npower status: on\n";
        assert_eq!(parse_power_status(on), Some(true));
        assert_eq!(parse_power_status("power status: standby"), Some(false));
        assert_eq!(parse_power_status("power status: unknown"), None);
        assert_eq!(parse_power_status("ERROR: could not open"), None);
    }

    #[test]
    fn test_cooldown_blocks_power_on() {
        let mut client = CecClient::new(0)
            .with_cooldown(Duration::from_secs(60))
            .with_program("/nonexistent/cec-client");
        client.last_power_off = Some(Instant::now());
        // refused before anything is spawned
        assert!(!client.power_on().unwrap());
    }

    #[test]
    fn test_cooldown_expires() {
        let mut client = CecClient::new(0).with_cooldown(Duration::from_millis(10));
        let off = Instant::now();
        client.last_power_off = Some(off);
        assert!(client.cooldown_remaining(off).is_some());
        assert!(client
            .cooldown_remaining(off + Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let mut client = CecClient::new(0).with_program("/nonexistent/cec-client");
        assert!(client.power_state().is_err());
    }
}
