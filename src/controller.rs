//! Wiring of queue, off-timer, state machine and worker, with ordered shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use log::{info, warn};

use crate::lifecycle::Background;
use crate::machine::{self, Executor, PowerStateMachine};
use crate::queue::{command_queue, CommandQueue, Worker};
use crate::{ControlSettings, Error, PowerBackend, PowerCommand, SensorStatus, Timer};

pub struct Controller {
    settings: ControlSettings,
    status: Arc<SensorStatus>,
    machine: Arc<PowerStateMachine>,
    timer: Timer,
    receiver: Option<Receiver<PowerCommand>>,
    tv_on: Arc<AtomicBool>,
    worker: Option<Background>,
    sensor: Option<Background>,
}

impl Controller {
    /// Create the queue and off-timer; commands queue up until [`Controller::start`]
    pub fn new(settings: ControlSettings, status: Arc<SensorStatus>) -> Result<Self, Error> {
        let (queue, receiver) = command_queue(settings.queue_capacity);
        let timer_queue = queue.clone();
        // Runs on the timer thread: enqueue only, the worker does the rest
        let timer = Timer::new(move |id| {
            let _ = timer_queue.enqueue(PowerCommand::TurnOff { timer: Some(id) });
        })?;
        Ok(Self {
            settings,
            status,
            machine: Arc::new(PowerStateMachine::new(queue)),
            timer,
            receiver: Some(receiver),
            tv_on: Arc::new(AtomicBool::new(false)),
            worker: None,
            sensor: None,
        })
    }

    /// The presence handler to give to a sensor reader
    pub fn machine(&self) -> Arc<PowerStateMachine> {
        Arc::clone(&self.machine)
    }

    pub fn queue(&self) -> &CommandQueue {
        self.machine.queue()
    }

    /// Hand over the sensor reader thread so it is stopped first on shutdown
    pub fn attach_sensor(&mut self, sensor: Background) {
        self.sensor = Some(sensor);
    }

    /// Sync with the TV once, then start the command worker
    pub fn start(&mut self, mut backend: Box<dyn PowerBackend>) -> Result<(), Error> {
        let receiver = self.receiver.take().ok_or(Error::AlreadyStarted)?;

        let tv_on = if self.settings.dry_run {
            info!("DRY RUN: Skipping TV state sync");
            false
        } else {
            machine::startup_sync(backend.as_mut())
        };
        // The query may take seconds, presence is only read once it returned
        let mut presence = self.status.presence();
        if tv_on && presence != Some(true) {
            info!("TV is ON with no presence detected, scheduling turn off");
            self.machine.schedule_off();
            // The reader publishes before it enqueues, so an edge queued ahead
            // of the off-timer shows up here
            presence = self.status.presence();
            if presence == Some(true) {
                info!("Presence detected during startup, keeping TV on");
                self.machine.cancel_off();
            }
        }

        let executor = Executor::new(
            backend,
            self.timer.handle(),
            self.settings.turn_off_delay,
            self.settings.dry_run,
        )
        .with_state(tv_on, presence.unwrap_or(false));
        self.tv_on = executor.shared_tv_on();
        let worker = Worker::new(
            receiver,
            executor,
            Arc::clone(&self.status),
            self.settings.settle_time,
        );
        self.worker = Some(worker.spawn()?);
        Ok(())
    }

    /// False once the sensor reader or the worker thread has exited
    pub fn is_healthy(&self) -> bool {
        let alive = |thread: &Option<Background>| thread.as_ref().map_or(true, |t| !t.is_finished());
        alive(&self.sensor) && alive(&self.worker)
    }

    /// True while the command worker is running
    pub fn worker_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// TV power as last tracked by the worker
    pub fn tv_on(&self) -> bool {
        self.tv_on.load(Ordering::Acquire)
    }

    /// Stop the reader, drop the pending off-timer and stop the worker, each with a bounded wait
    pub fn stop(mut self) {
        info!("Stopping presence sensor system...");
        if let Some(sensor) = self.sensor.take() {
            let name = sensor.name().to_string();
            if !sensor.stop(self.settings.reader_join_timeout) {
                warn!("Continuing shutdown without {}", name);
            }
        }
        self.timer.terminate();
        if let Some(worker) = self.worker.take() {
            if !worker.stop(self.settings.worker_join_timeout) {
                warn!("Continuing shutdown without command worker");
            }
        }
        info!("System stopped");
    }
}
