//! Bounded command queue and the single worker that drains it
//!
//! Producers (sensor callbacks, the off-timer) never block: when the queue
//! is full the new command is dropped and logged. The worker is the only
//! thread that talks to the TV backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::lifecycle::Background;
use crate::machine::{Executed, Executor};
use crate::{Error, PowerCommand, SensorStatus};

/// Producer side of the command queue
#[derive(Clone, Debug)]
pub struct CommandQueue {
    sender: SyncSender<PowerCommand>,
    capacity: usize,
    dropped: Arc<AtomicUsize>,
}

/// Create a queue holding at most `capacity` commands
pub fn command_queue(capacity: usize) -> (CommandQueue, Receiver<PowerCommand>) {
    // A zero-sized sync_channel is a rendezvous, which would block producers
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::sync_channel(capacity);
    let queue = CommandQueue {
        sender,
        capacity,
        dropped: Arc::new(AtomicUsize::new(0)),
    };
    (queue, receiver)
}

impl CommandQueue {
    /// Insert without blocking, dropping `command` if the queue is full
    pub fn enqueue(&self, command: PowerCommand) -> Result<(), Error> {
        match self.sender.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Command queue full ({} pending), dropping {:?}",
                    self.capacity, command
                );
                Err(Error::QueueFull(command))
            }
            Err(TrySendError::Disconnected(command)) => {
                error!("Command worker gone, dropping {:?}", command);
                Err(Error::QueueClosed)
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commands dropped because the queue was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains the queue and executes each command against the backend
pub struct Worker {
    receiver: Receiver<PowerCommand>,
    executor: Executor,
    status: Arc<SensorStatus>,
    settle_time: Duration,
    running: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        receiver: Receiver<PowerCommand>,
        executor: Executor,
        status: Arc<SensorStatus>,
        settle_time: Duration,
    ) -> Self {
        Self {
            receiver,
            executor,
            status,
            settle_time,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(self) -> std::io::Result<Background> {
        let running = Arc::clone(&self.running);
        Background::spawn("command-worker", running, move || self.run())
    }

    fn run(mut self) {
        info!("Command worker started");
        while self.running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(crate::QUEUE_POLL) {
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Command queue closed");
                    break;
                }
            }
        }
        info!("Command worker stopped");
    }

    /// Execute one command, discarding sensor input buffered around it
    pub fn handle(&mut self, command: PowerCommand) {
        debug!("Executing {:?}", command);
        self.status.discard_stale_input();
        let executed = self.executor.execute(command);
        self.status.discard_stale_input();

        if executed == Executed::TvOperation {
            thread::sleep(self.settle_time);
            self.check_presence();
        }
    }

    /// Log, but never act on, a sensor that disagrees with the tracked presence
    fn check_presence(&self) {
        let tracked = self.executor.presence();
        match self.status.presence() {
            Some(sensed) if sensed != tracked => warn!(
                "Presence mismatch after TV operation: sensor {}, tracked {}",
                sensed, tracked
            ),
            Some(_) => debug!("Presence consistent after TV operation"),
            None => debug!("No sensor reading to compare after TV operation"),
        }
    }
}
