use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};
use presence_tv::config::SensorMode;
use presence_tv::gpio::GpioReader;
use presence_tv::uart::{self, UartReader};
use presence_tv::{backend, Config, Controller, SensorStatus, INITIAL_SYNC_TIMEOUT};

/// Presence detection TV control
#[derive(Debug, Parser)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// Track TV state without controlling the TV
    #[arg(long)]
    dry_run: bool,
    /// Debug logging and a status line every second
    #[arg(short, long)]
    verbose: bool,
    /// Store a new detection range (metres) in the sensor and exit
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    configure_range: Option<Vec<f64>>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if args.dry_run {
        config.dev_mode.dry_run = true;
    }
    if args.verbose {
        config.dev_mode.verbose = true;
        config.logging.level = "debug".to_string();
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    if let Some(range) = args.configure_range.as_deref() {
        let [min, max] = range else {
            anyhow::bail!("--configure-range takes MIN and MAX");
        };
        uart::configure_range(&config.sensor.uart, *min, *max)
            .context("configuring sensor range")?;
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let signalled = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signalled.store(false, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    let tv = backend::build(&config.tv_control.backend).context("setting up TV backend")?;
    let status = Arc::new(SensorStatus::new());
    let mut controller = Controller::new(config.control_settings(), Arc::clone(&status))?;

    let sensor = match config.sensor.mode {
        SensorMode::Uart => {
            UartReader::start(config.sensor.uart.clone(), controller.machine(), Arc::clone(&status))
                .context("starting UART sensor")?
        }
        SensorMode::Trigger => {
            GpioReader::start(&config.sensor.trigger, controller.machine(), Arc::clone(&status))
                .context("starting GPIO sensor")?
        }
    };
    controller.attach_sensor(sensor);

    match status.wait_for_first_reading(INITIAL_SYNC_TIMEOUT) {
        Some(present) => info!(
            "Initial sensor state synced: {}",
            if present { "PRESENT" } else { "ABSENT" }
        ),
        None => warn!("No initial sensor data received - assuming no presence"),
    }

    controller.start(tv).context("starting command worker")?;
    info!("Presence sensor system started");

    while running.load(Ordering::SeqCst) {
        if !controller.is_healthy() {
            warn!("A worker thread exited unexpectedly");
            break;
        }
        if config.dev_mode.verbose {
            debug!(
                "Status: {}, TV: {}, sensor {}, worker {}, {} commands dropped",
                match status.presence() {
                    Some(true) => "PRESENT",
                    Some(false) => "ABSENT",
                    None => "UNKNOWN",
                },
                if controller.tv_on() { "ON" } else { "OFF" },
                if status.is_connected() { "connected" } else { "disconnected" },
                if controller.worker_alive() { "alive" } else { "dead" },
                controller.queue().dropped()
            );
        }
        thread::sleep(Duration::from_secs(1));
    }

    controller.stop();
    Ok(())
}
