//! Presence-to-power decision logic
//!
//! Two halves: [`PowerStateMachine`] receives presence edges on the sensor
//! thread and only enqueues commands, [`Executor`] runs on the command
//! worker and owns everything the commands touch: the backend, the tracked
//! TV power state and the pending off-timer.
//!
//! ```text
//!            presence detected                 presence lost
//!   Idle  ----------------------->  Active  ---------------------> Active + off pending
//!    ^   CancelOffTimer, TurnOn            StartOffTimer                 |        |
//!    |                                                                   |        |
//!    +------------------- TurnOff (timer expired) ----------------------+        |
//!                                    Active <------- presence detected ----------+
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::backend::PowerBackend;
use crate::queue::CommandQueue;
use crate::timer::TimerHandle;
use crate::{PowerCommand, PresenceHandler, TimerId};

/// Turns presence edges into queued power commands
#[derive(Debug, Clone)]
pub struct PowerStateMachine {
    queue: CommandQueue,
}

impl PowerStateMachine {
    pub fn new(queue: CommandQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Arm the off-timer, replacing any pending one
    pub fn schedule_off(&self) {
        // Failures are logged by the queue, the next edge re-enqueues
        let _ = self.queue.enqueue(PowerCommand::StartOffTimer);
    }

    /// Disarm the off-timer without touching the TV
    pub fn cancel_off(&self) {
        let _ = self.queue.enqueue(PowerCommand::CancelOffTimer);
    }
}

impl PresenceHandler for PowerStateMachine {
    fn on_presence_detected(&self) {
        info!("PRESENCE DETECTED");
        // Cancel goes first so the worker sees it before the turn-on
        let _ = self.queue.enqueue(PowerCommand::CancelOffTimer);
        let _ = self.queue.enqueue(PowerCommand::TurnOn);
    }

    fn on_presence_lost(&self) {
        info!("PRESENCE LOST");
        self.schedule_off();
    }
}

/// Query the backend once at startup, treating anything indeterminate as off
pub fn startup_sync(backend: &mut dyn PowerBackend) -> bool {
    match backend.power_state() {
        Ok(Some(on)) => {
            info!("TV state synchronized: {}", if on { "on" } else { "off" });
            on
        }
        Ok(None) => {
            warn!("TV power state unknown, assuming off");
            false
        }
        Err(e) => {
            warn!("Could not sync TV state: {}, assuming off", e);
            false
        }
    }
}

/// What executing a command amounted to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Executed {
    /// Timer bookkeeping only, the TV was not touched
    Bookkeeping,
    /// The backend was asked to change the TV power (or would have been, in dry run)
    TvOperation,
    /// A turn-off from a timer that was already cancelled or replaced
    Stale,
}

/// Counters over the off-timer lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub started: u64,
    /// Pending timers cancelled, by presence or by being replaced
    pub cancelled: u64,
    pub expired: u64,
    pub stale: u64,
}

/// Executes commands on the worker thread
pub struct Executor {
    backend: Box<dyn PowerBackend>,
    timer: TimerHandle,
    turn_off_delay: Duration,
    dry_run: bool,
    tv_on: bool,
    shared_tv_on: Arc<AtomicBool>,
    presence: bool,
    armed: Option<TimerId>,
    next_timer: u64,
    stats: TimerStats,
}

impl Executor {
    pub fn new(
        backend: Box<dyn PowerBackend>,
        timer: TimerHandle,
        turn_off_delay: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            backend,
            timer,
            turn_off_delay,
            dry_run,
            tv_on: false,
            shared_tv_on: Arc::new(AtomicBool::new(false)),
            presence: false,
            armed: None,
            next_timer: 0,
            stats: TimerStats::default(),
        }
    }

    /// Seed the tracked state, normally from the startup sync
    pub fn with_state(mut self, tv_on: bool, presence: bool) -> Self {
        self.track_tv(tv_on);
        self.presence = presence;
        self
    }

    pub fn tv_on(&self) -> bool {
        self.tv_on
    }

    /// Tracked TV state, readable from other threads
    pub fn shared_tv_on(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared_tv_on)
    }

    fn track_tv(&mut self, on: bool) {
        self.tv_on = on;
        self.shared_tv_on.store(on, Ordering::Release);
    }

    pub fn presence(&self) -> bool {
        self.presence
    }

    /// The live off-timer, if any
    pub fn armed(&self) -> Option<TimerId> {
        self.armed
    }

    pub fn stats(&self) -> TimerStats {
        self.stats
    }

    pub fn execute(&mut self, command: PowerCommand) -> Executed {
        match command {
            PowerCommand::CancelOffTimer => {
                self.presence = true;
                if self.cancel_timer() {
                    info!("Cancelled scheduled TV off");
                }
                Executed::Bookkeeping
            }
            PowerCommand::StartOffTimer => {
                self.presence = false;
                self.cancel_timer();
                self.next_timer += 1;
                let id = TimerId(self.next_timer);
                if self.timer.start(id, self.turn_off_delay).is_err() {
                    error!("Off-timer thread is gone, cannot schedule TV off");
                    return Executed::Bookkeeping;
                }
                self.armed = Some(id);
                self.stats.started += 1;
                info!(
                    "Scheduling TV off in {:.1} seconds ({})",
                    self.turn_off_delay.as_secs_f64(),
                    id
                );
                Executed::Bookkeeping
            }
            PowerCommand::TurnOn => {
                self.presence = true;
                self.set_power(true);
                Executed::TvOperation
            }
            PowerCommand::TurnOff { timer: Some(id) } if self.armed != Some(id) => {
                debug!("Discarding turn-off from stale {}", id);
                self.stats.stale += 1;
                Executed::Stale
            }
            PowerCommand::TurnOff { timer } => {
                if timer.is_some() {
                    self.armed = None;
                    self.stats.expired += 1;
                }
                self.set_power(false);
                Executed::TvOperation
            }
        }
    }

    /// Returns true if a pending timer was cancelled
    fn cancel_timer(&mut self) -> bool {
        match self.armed.take() {
            Some(id) => {
                if self.timer.stop().is_err() {
                    warn!("Off-timer thread is gone while cancelling {}", id);
                }
                self.stats.cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Ask the backend for `on`, tracking the state only on reported success
    fn set_power(&mut self, on: bool) {
        let label = if on { "ON" } else { "OFF" };
        info!("Turning TV {}", label);

        if self.dry_run {
            info!("DRY RUN: Would turn TV {}", label);
            self.track_tv(on);
            return;
        }

        let result = if on {
            self.backend.power_on()
        } else {
            self.backend.power_off()
        };
        match result {
            Ok(true) => {
                self.track_tv(on);
                info!("TV turned {} successfully", label);
            }
            Ok(false) => error!("Failed to turn TV {}", label),
            Err(e) => error!("Error turning TV {}: {}", label, e),
        }
    }
}
