use std::sync::mpsc;
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::{Signal, TimerId};

pub type SignalResult = Result<(), mpsc::SendError<Signal>>;

/// A cancellable single-shot timer
///
/// At most one countdown is alive: starting the timer again replaces the
/// running countdown instead of stacking a second one.
#[derive(Debug)]
pub struct Timer {
    thread: Option<JoinHandle<()>>,
    sender: Sender<Signal>,
}

/// Cloneable sending side of a [`Timer`]
#[derive(Clone, Debug)]
pub struct TimerHandle {
    sender: Sender<Signal>,
}

impl TimerHandle {
    /// Arm the timer as `id`, firing after `delay` unless stopped or restarted
    pub fn start(&self, id: TimerId, delay: Duration) -> SignalResult {
        self.sender.send(Signal::Start { id, delay })
    }
    /// Disarm the timer
    pub fn stop(&self) -> SignalResult {
        self.sender.send(Signal::Stop)
    }
}

impl Timer {
    /// Create new timer thread
    ///
    /// * `on_timeout` - called on the timer thread with the id of the expired countdown
    pub fn new<F>(on_timeout: F) -> std::io::Result<Self>
    where
        F: Fn(TimerId) + Send + 'static,
    {
        // Create sender and receiver to communicate with timer thread
        let (sender, receiver) = mpsc::channel::<Signal>();

        let thread = thread::Builder::new()
            .name("off-timer".to_string())
            .spawn(move || {
                let mut pending: Option<(TimerId, Instant)> = None;
                loop {
                    // Wait for signal or deadline, whichever comes first
                    let signal = match pending {
                        Some((_, deadline)) => {
                            receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                        }
                        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match signal {
                        Ok(Signal::Start { id, delay }) => {
                            if let Some((old, _)) = pending.replace((id, Instant::now() + delay)) {
                                debug!("{old} replaced by {id}");
                            }
                        }
                        Ok(Signal::Stop) => {
                            if let Some((old, _)) = pending.take() {
                                debug!("{old} cancelled");
                            }
                        }
                        Ok(Signal::Terminate) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if let Some((id, _)) = pending.take() {
                                debug!("{id} expired");
                                on_timeout(id);
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            thread: Some(thread),
            sender,
        })
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            sender: self.sender.clone(),
        }
    }

    /// Stop the timer thread, dropping any pending countdown
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            // Fails only if the thread already exited
            let _ = self.sender.send(Signal::Terminate);
            if thread.join().is_err() {
                warn!("off-timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
