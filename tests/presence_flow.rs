//! End-to-end behaviour of the controller with a recording backend.
//!
//! Delays are scaled down to a few hundred milliseconds.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use presence_tv::uart::Session;
use presence_tv::{ControlSettings, Controller, Error, PowerBackend, PresenceHandler, SensorStatus};

#[derive(Clone, Default)]
struct RecordingTv {
    calls: Arc<Mutex<Vec<&'static str>>>,
    reports_on: bool,
    block_on: Option<Duration>,
    block_state: Option<Duration>,
}

impl RecordingTv {
    fn power_calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|call| *call != "state")
            .collect()
    }

    fn all_calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl PowerBackend for RecordingTv {
    fn power_on(&mut self) -> Result<bool, Error> {
        if let Some(block) = self.block_on {
            thread::sleep(block);
        }
        self.calls.lock().unwrap().push("on");
        Ok(true)
    }

    fn power_off(&mut self) -> Result<bool, Error> {
        self.calls.lock().unwrap().push("off");
        Ok(true)
    }

    fn power_state(&mut self) -> Result<Option<bool>, Error> {
        if let Some(block) = self.block_state {
            thread::sleep(block);
        }
        self.calls.lock().unwrap().push("state");
        Ok(Some(self.reports_on))
    }
}

fn settings(turn_off_delay: Duration) -> ControlSettings {
    ControlSettings {
        turn_off_delay,
        settle_time: Duration::from_millis(10),
        queue_capacity: 8,
        dry_run: false,
        reader_join_timeout: Duration::from_millis(200),
        worker_join_timeout: Duration::from_millis(500),
    }
}

fn started(settings: ControlSettings, tv: &RecordingTv) -> Controller {
    let status = Arc::new(SensorStatus::new());
    status.set_presence(Some(false));
    let mut controller = Controller::new(settings, status).unwrap();
    controller.start(Box::new(tv.clone())).unwrap();
    controller
}

#[test]
fn presence_detected_before_expiry_preempts_turn_off() {
    let tv = RecordingTv::default();
    let controller = started(settings(Duration::from_millis(400)), &tv);
    let machine = controller.machine();

    machine.on_presence_lost();
    thread::sleep(Duration::from_millis(200));
    machine.on_presence_detected();
    thread::sleep(Duration::from_millis(600));

    assert_eq!(tv.power_calls(), vec!["on"]);
    controller.stop();
}

#[test]
fn presence_lost_turns_tv_off_after_delay() {
    let tv = RecordingTv::default();
    let controller = started(settings(Duration::from_millis(100)), &tv);
    let machine = controller.machine();

    machine.on_presence_detected();
    machine.on_presence_lost();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(tv.power_calls(), vec!["on"]);
    thread::sleep(Duration::from_millis(400));
    assert_eq!(tv.power_calls(), vec!["on", "off"]);
    assert!(!controller.tv_on());
    controller.stop();
}

#[test]
fn repeated_presence_lost_fires_only_the_last_timer() {
    let tv = RecordingTv::default();
    let controller = started(settings(Duration::from_millis(150)), &tv);
    let machine = controller.machine();

    for _ in 0..3 {
        machine.on_presence_lost();
        thread::sleep(Duration::from_millis(50));
    }
    thread::sleep(Duration::from_millis(500));

    assert_eq!(tv.power_calls(), vec!["off"]);
    controller.stop();
}

#[test]
fn tv_left_on_without_presence_is_turned_off() {
    let tv = RecordingTv {
        reports_on: true,
        ..RecordingTv::default()
    };
    let controller = started(settings(Duration::from_millis(100)), &tv);
    thread::sleep(Duration::from_millis(400));

    assert_eq!(tv.all_calls(), vec!["state", "off"]);
    controller.stop();
}

#[test]
fn tv_on_with_presence_is_left_alone() {
    let tv = RecordingTv {
        reports_on: true,
        ..RecordingTv::default()
    };
    let status = Arc::new(SensorStatus::new());
    status.set_presence(Some(true));
    let mut controller = Controller::new(settings(Duration::from_millis(50)), status).unwrap();
    controller.start(Box::new(tv.clone())).unwrap();
    thread::sleep(Duration::from_millis(250));

    assert_eq!(tv.all_calls(), vec!["state"]);
    assert!(controller.tv_on());
    assert!(controller.worker_alive());
    controller.stop();
}

#[test]
fn presence_arriving_during_startup_query_keeps_tv_on() {
    let tv = RecordingTv {
        reports_on: true,
        block_state: Some(Duration::from_millis(300)),
        ..RecordingTv::default()
    };
    let status = Arc::new(SensorStatus::new());
    status.set_presence(Some(false));
    let mut controller =
        Controller::new(settings(Duration::from_millis(200)), Arc::clone(&status)).unwrap();

    let machine = controller.machine();
    let sensor_status = Arc::clone(&status);
    let sensor = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        sensor_status.set_presence(Some(true));
        machine.on_presence_detected();
    });
    controller.start(Box::new(tv.clone())).unwrap();
    sensor.join().unwrap();
    thread::sleep(Duration::from_millis(600));

    assert_eq!(tv.all_calls(), vec!["state", "on"]);
    controller.stop();
}

#[test]
fn dry_run_never_touches_backend() {
    let tv = RecordingTv {
        reports_on: true,
        ..RecordingTv::default()
    };
    let controller = started(
        ControlSettings {
            dry_run: true,
            ..settings(Duration::from_millis(50))
        },
        &tv,
    );
    let machine = controller.machine();
    machine.on_presence_detected();
    machine.on_presence_lost();
    thread::sleep(Duration::from_millis(300));

    assert!(tv.all_calls().is_empty());
    controller.stop();
}

#[test]
fn start_twice_is_rejected() {
    let tv = RecordingTv::default();
    let mut controller = started(settings(Duration::from_secs(1)), &tv);
    assert!(matches!(
        controller.start(Box::new(tv.clone())),
        Err(Error::AlreadyStarted)
    ));
    controller.stop();
}

#[test]
fn callbacks_return_while_worker_is_busy() {
    let tv = RecordingTv {
        block_on: Some(Duration::from_millis(300)),
        ..RecordingTv::default()
    };
    let controller = started(settings(Duration::from_secs(10)), &tv);
    let machine = controller.machine();

    machine.on_presence_detected();
    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    for _ in 0..20 {
        machine.on_presence_lost();
        machine.on_presence_detected();
    }
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(controller.queue().dropped() > 0);
    controller.stop();
}

#[test]
fn shutdown_is_bounded_when_backend_hangs() {
    let tv = RecordingTv {
        block_on: Some(Duration::from_secs(2)),
        ..RecordingTv::default()
    };
    let controller = started(settings(Duration::from_secs(10)), &tv);
    controller.machine().on_presence_detected();
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    controller.stop();
    assert!(start.elapsed() < Duration::from_millis(1500));
}

#[test]
fn sentence_stream_drives_the_tv() {
    let tv = RecordingTv::default();
    let controller = started(settings(Duration::from_millis(100)), &tv);
    let machine = controller.machine();
    let mut session = Session::default();

    for line in ["$JYBSS,0,,,*\n", "$JYBSS,1,,,*\n", "$JYBSS,1,,,*\n", "$JYBSS,0,,,*\n"] {
        session.feed(line.as_bytes(), Instant::now(), &*machine);
    }
    thread::sleep(Duration::from_millis(400));

    assert_eq!(tv.power_calls(), vec!["on", "off"]);
    controller.stop();
}
