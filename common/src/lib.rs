//! Shared utilities for the TPC tools
//!
//! This crate hosts everything the third-party-copy daemon needs that is not specific to
//! sessions or transfers:
//!
//! - [`run`] - builds the tokio runtime, installs the tracing subscriber, configures the
//!   transfer throttles and runs the async entry point of a binary
//! - [`units`] - parsing of human readable sizes and times (`"4M"`, `"2H"`, `"5min"`)
//! - [`progress`] - process-wide session and transfer counters
//! - [`version`] - protocol version exchanged between peers
//! - [`config`] - runtime, output, throttle and tracing settings
//!
//! # Logging
//!
//! Verbosity follows the usual convention: `-v` INFO, `-vv` DEBUG, `-vvv` TRACE, default ERROR.
//! `RUST_LOG` overrides the verbosity derived filter. A debug log file receives DEBUG and above
//! regardless of the console level.

use anyhow::Context;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod config;
pub mod progress;
pub mod units;
pub mod version;

pub use config::{OutputConfig, RuntimeConfig, ThrottleConfig, TracingConfig};

static PROGRESS: std::sync::LazyLock<progress::Progress> =
    std::sync::LazyLock::new(progress::Progress::new);

pub fn get_progress() -> &'static progress::Progress {
    &PROGRESS
}

/// Periodic progress reporting.
#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    /// Delay between reports, human readable (e.g. "10s", "500ms"), defaults to 10s
    pub progress_delay: Option<String>,
}

const DEFAULT_PROGRESS_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

/// Builds a unique log file name: `<prefix>-YYYY-MM-DDTHH-MM-SS-<random>`.
pub fn generate_debug_log_filename(prefix: &str) -> String {
    let now = chrono::Local::now();
    format!(
        "{}-{}-{:08x}",
        prefix,
        now.format("%Y-%m-%dT%H-%M-%S"),
        rand::random::<u32>()
    )
}

fn console_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    if output.quiet {
        return tracing_subscriber::EnvFilter::new("off");
    }
    let level = match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
}

fn setup_logging(output: &OutputConfig, tracing_config: &TracingConfig) -> anyhow::Result<()> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(console_filter(output));
    let file_layer = match &tracing_config.debug_log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open debug log file {path:?}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_filter(tracing_subscriber::EnvFilter::new("debug")),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

async fn report_progress(delay: std::time::Duration) {
    let mut printer = progress::ProgressPrinter::new(get_progress());
    let mut interval = tokio::time::interval(delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        tracing::info!("\n{}", printer.print());
    }
}

fn setup_throttle(throttle: &ThrottleConfig) {
    throttle::set_max_transfers(throttle.max_transfers);
    let tokens = throttle.chunk_tokens_per_interval();
    if tokens > 0 {
        throttle::init_chunk_tokens(tokens);
        let interval = std::time::Duration::from_secs(1) / config::THROTTLE_INTERVALS_PER_SEC as u32;
        tokio::spawn(throttle::run_chunk_replenish_thread(tokens, interval));
    }
}

/// Runs the async entry point of a binary on a freshly configured runtime.
///
/// Returns `None` when setup or `func` failed; the error has been logged already so the
/// caller only has to pick an exit code.
pub fn run<Fut, Summary, Func>(
    progress: Option<ProgressSettings>,
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle: ThrottleConfig,
    tracing_config: TracingConfig,
    func: Func,
) -> Option<Summary>
where
    Func: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
    Summary: std::fmt::Display,
{
    if let Err(error) = setup_logging(&output, &tracing_config) {
        eprintln!("{error:#}");
        return None;
    }
    if let Err(error) = throttle.validate() {
        tracing::error!("invalid throttle settings: {error}");
        return None;
    }
    let progress_delay = match progress.map(|settings| settings.progress_delay) {
        None => None,
        Some(None) => Some(DEFAULT_PROGRESS_DELAY),
        Some(Some(delay)) => match humantime::parse_duration(&delay) {
            Ok(delay) => Some(delay),
            Err(error) => {
                tracing::error!("invalid progress delay {delay:?}: {error}");
                return None;
            }
        },
    };
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!("failed to build tokio runtime: {error}");
            return None;
        }
    };
    let result = rt.block_on(async move {
        setup_throttle(&throttle);
        let progress_task = progress_delay.map(|delay| tokio::spawn(report_progress(delay)));
        let result = func().await;
        if let Some(task) = progress_task {
            task.abort();
        }
        result
    });
    match result {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            None
        }
    }
}
