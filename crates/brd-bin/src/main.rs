//! braild: background daemon projecting a text console onto a
//! refreshable braille display.
//!
//! This binary is deliberately thin: parse options, set up logging, load
//! preferences, construct the driver (with backoff), then hand everything
//! to the update loop. All behaviour lives in the library crates.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use core_braille::{BrailleDisplay, DRIVER_NAMES, Driver, DriverResult};
use core_cmd::{Alert, AlertSink};
use core_config::Preferences;
use core_screen::{NullSpeech, Screen};
use core_transport::Endpoint;
use tracing_subscriber::EnvFilter;

mod autospeak;
mod demo;
mod update;

use update::UpdateLoop;

#[derive(Debug, Parser)]
#[command(name = "braild", version, about = "Braille display daemon core")]
struct Args {
    /// Device endpoint: serial:/dev/ttyUSB0, usb:[SERIAL], or
    /// bluetooth:AA:BB:CC:DD:EE:FF.
    #[arg(short = 'd', long, default_value = "serial:/dev/ttyUSB0")]
    device: String,

    /// Braille driver family.
    #[arg(short = 'b', long, default_value = "vario")]
    driver: String,

    /// Preferences file path (discovered when omitted).
    #[arg(short = 'f', long)]
    preferences: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,

    /// Update tick interval in milliseconds.
    #[arg(short = 'M', long, default_value_t = 40)]
    update_interval: u64,

    /// Serve this text file as the demo screen instead of the banner.
    #[arg(long)]
    screen_file: Option<PathBuf>,

    /// List the available driver names and exit.
    #[arg(long)]
    list_drivers: bool,
}

/// Cues rendered into the log; a tone generator is an external concern.
struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&mut self, alert: Alert) {
        tracing::debug!(target: "alerts", ?alert, "cue");
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(
                directory.unwrap_or_else(|| std::path::Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Probe the device, backing off between attempts. Transient probe
/// failures are common right after a device powers up.
fn connect_with_backoff(
    name: &str,
    endpoint: &Endpoint,
    terminate: &AtomicBool,
) -> DriverResult<(Box<dyn Driver>, BrailleDisplay)> {
    const ATTEMPTS: u32 = 5;
    let mut delay = Duration::from_millis(500);
    let mut last = None;
    for attempt in 1..=ATTEMPTS {
        if terminate.load(Ordering::Relaxed) {
            break;
        }
        match core_braille::connect(name, endpoint) {
            Ok(pair) => return Ok(pair),
            Err(error) => {
                tracing::warn!(target: "main", attempt, %error, "driver probe failed");
                last = Some(error);
                if attempt < ATTEMPTS {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
    Err(last.unwrap_or(core_braille::DriverError::ProbeFailed(ATTEMPTS as usize)))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.list_drivers {
        for name in DRIVER_NAMES {
            println!("{name}");
        }
        return Ok(());
    }

    let _log_guard = init_logging(args.log_file.as_ref())?;
    tracing::info!(target: "main", device = %args.device, driver = %args.driver, "starting");

    let prefs_path = args
        .preferences
        .clone()
        .unwrap_or_else(Preferences::discover);
    // Configuration problems are reported once and replaced by defaults;
    // a broken file must not keep the display dark.
    let prefs = match Preferences::load(Some(&prefs_path)) {
        Ok(prefs) => prefs,
        Err(error) => {
            tracing::error!(target: "main", %error, "preferences unusable, using defaults");
            Preferences::default()
        }
    };

    let endpoint = Endpoint::parse(&args.device)
        .with_context(|| format!("device endpoint {}", args.device))?;

    let terminate = Arc::new(AtomicBool::new(false));
    {
        let terminate = terminate.clone();
        ctrlc::set_handler(move || {
            terminate.store(true, Ordering::Relaxed);
        })
        .context("installing termination handler")?;
    }

    let screen: Box<dyn Screen> = match &args.screen_file {
        Some(path) => Box::new(
            demo::screen_from_file(path)
                .with_context(|| format!("screen file {}", path.display()))?,
        ),
        None => Box::new(demo::banner_screen()),
    };

    let (driver, brl) = connect_with_backoff(&args.driver, &endpoint, &terminate)
        .context("constructing braille driver")?;
    tracing::info!(
        target: "main",
        columns = brl.text_columns,
        rows = brl.text_rows,
        status = brl.status_columns,
        "display ready"
    );

    let factory: update::DriverFactory = {
        let name = args.driver.clone();
        Box::new(move || core_braille::connect(&name, &endpoint))
    };

    let mut update_loop = UpdateLoop::new(
        driver,
        brl,
        factory,
        screen,
        prefs,
        prefs_path,
        Box::new(LogAlerts),
        Box::new(NullSpeech),
        Duration::from_millis(args.update_interval.max(10)),
        Duration::from_millis(4000),
        terminate,
    );
    update_loop.run()
}
