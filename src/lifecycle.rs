//! Named background threads that can be stopped with a bounded wait

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, warn};

/// A thread running a loop that checks a shared `running` flag
#[derive(Debug)]
pub struct Background {
    name: String,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

impl Background {
    /// Spawn `body` on a named thread, `running` is set before it starts
    pub fn spawn<F>(name: &str, running: Arc<AtomicBool>, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_sender, done) = mpsc::channel();
        running.store(true, Ordering::SeqCst);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body();
                // Receiver may already be gone if the owner gave up waiting
                let _ = done_sender.send(());
            })?;
        Ok(Self {
            name: name.to_string(),
            running,
            thread,
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Clear the running flag and wait up to `timeout` for the thread to exit
    ///
    /// Returns false if the thread is still running, it is then left detached.
    pub fn stop(self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        match self.done.recv_timeout(timeout) {
            // Disconnected: the body panicked before signalling
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    error!("{} thread panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("{} thread did not stop within {:?}", self.name, timeout);
                false
            }
        }
    }
}
