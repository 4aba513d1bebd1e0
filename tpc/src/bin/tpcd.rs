use anyhow::Context;
use clap::Parser;
use tracing::instrument;

fn parse_size(s: &str) -> Result<u64, String> {
    common::units::parse_unit(s).map_err(|e| format!("{e}"))
}

fn parse_block_size(s: &str) -> Result<u64, String> {
    let value = parse_size(s)?;
    if value > tpc::config::MAX_BLOCK_SIZE {
        return Err(format!(
            "value must be at most {}M",
            tpc::config::MAX_BLOCK_SIZE >> 20
        ));
    }
    Ok(value)
}

fn parse_time(s: &str) -> Result<std::time::Duration, String> {
    let value = common::units::parse_duration(s).map_err(|e| format!("{e}"))?;
    if value.is_zero() {
        return Err("value must be at least 1s".to_string());
    }
    Ok(value)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tpcd",
    version,
    about = "Storage daemon with third-party-copy support",
    long_about = "`tpcd` serves files below a root directory and coordinates third-party copies between servers.

A client opens the target on the destination tpcd with tpc.key, tpc.src and tpc.lfn and the source on the source tpcd with the same tpc.key. Syncing the destination twice makes it pull the file directly from the source; the client only waits for the outcome."
)]
struct Args {
    // Server options
    /// Address to listen on
    #[arg(
        long,
        default_value = "0.0.0.0:1094",
        value_name = "ADDR",
        help_heading = "Server options"
    )]
    bind: String,

    /// Directory the served paths are relative to
    #[arg(long, value_name = "DIR", help_heading = "Server options")]
    root: std::path::PathBuf,

    // Third-party copy
    /// Transfer block size (4M to 64M), e.g. "8M"
    #[arg(
        long,
        default_value = "4M",
        value_name = "SIZE",
        value_parser = parse_block_size,
        help_heading = "Third-party copy"
    )]
    block_size: u64,

    /// Lifetime of a third-party-copy session, e.g. "60s", "2min"
    #[arg(
        long,
        default_value = "60s",
        value_name = "TIME",
        value_parser = parse_time,
        help_heading = "Third-party copy"
    )]
    session_ttl: std::time::Duration,

    /// How long expired sessions linger before they are swept, e.g. "4H"
    #[arg(
        long,
        default_value = "4H",
        value_name = "TIME",
        value_parser = parse_time,
        help_heading = "Third-party copy"
    )]
    sweep_grace: std::time::Duration,

    /// Security protocol whose callers skip the origin check
    #[arg(
        long,
        default_value = "sss",
        value_name = "PROTOCOL",
        help_heading = "Third-party copy"
    )]
    trusted_protocol: String,

    // Progress & output
    /// Periodically log session and transfer counters
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Set delay between progress updates
    ///
    /// Default is 10s. If specified, --progress flag is implied. Accepts human-readable durations like "500ms", "10s", "5min".
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    /// Print a summary when the daemon stops
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    // Performance & throttling
    /// Maximum number of transfers pulling data at the same time (0 = no limit)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    max_transfers: usize,

    /// Limit block reads per second across all transfers (0 = no throttle)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Performance & throttling"
    )]
    chunk_throttle: usize,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    /// Enable file-based debug logging
    ///
    /// Example: /tmp/tpcd-log creates /tmp/tpcd-log-YYYY-MM-DDTHH-MM-SS-RANDOM
    #[arg(long, value_name = "PREFIX", help_heading = "Advanced settings")]
    debug_log_prefix: Option<String>,

    /// Print protocol version information as JSON and exit
    #[arg(long)]
    protocol_version: bool,
}

impl Args {
    fn tpc_config(&self) -> tpc::TpcConfig {
        tpc::TpcConfig {
            session_ttl: self.session_ttl,
            sweep_grace: self.sweep_grace,
            block_size: self.block_size,
            trusted_protocol: self.trusted_protocol.clone(),
            ..Default::default()
        }
    }
}

#[instrument]
async fn async_main(args: Args) -> anyhow::Result<tpc::server::ServeSummary> {
    let config = args.tpc_config();
    config
        .validate()
        .map_err(|error| anyhow::anyhow!("invalid configuration: {error}"))?;
    if config.effective_block_size() != args.block_size {
        tracing::warn!(
            "block size {} raised to {}",
            args.block_size,
            config.effective_block_size()
        );
    }
    let root = tokio::fs::canonicalize(&args.root)
        .await
        .with_context(|| format!("failed to open root directory {:?}", args.root))?;
    let storage = std::sync::Arc::new(tpc::LocalStorage::new(root.clone()));
    let fs = tpc::TpcFs::new(storage, std::sync::Arc::new(remote::TcpConnector), config);
    let listener = tpc::server::bind(&args.bind).await?;
    let listen_addr = listener
        .local_addr()
        .context("failed to get listener address")?;
    tracing::info!("serving {:?} on {}", root, listen_addr);
    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("interrupted, no longer accepting connections"),
                Err(error) => tracing::error!("failed to listen for ctrl-c: {}", error),
            }
            cancel.cancel();
        });
    }
    tpc::server::serve(listener, fs, cancel).await
}

fn main() -> Result<(), anyhow::Error> {
    // handle --protocol-version flag before parsing full arguments
    // this allows it to work without required arguments
    let args: Vec<String> = std::env::args().collect();
    let separator_pos = args.iter().position(|arg| arg == "--");
    let args_to_check = if let Some(pos) = separator_pos {
        &args[..pos]
    } else {
        &args[..]
    };
    if args_to_check.iter().any(|arg| arg == "--protocol-version") {
        let version = common::version::ProtocolVersion::current();
        let json = version.to_json()?;
        println!("{}", json);
        return Ok(());
    }

    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let debug_log_file = args.debug_log_prefix.as_ref().map(|prefix| {
        let filename = common::generate_debug_log_filename(prefix);
        println!("tpcd: Debug logging to file: {filename}");
        filename
    });
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let throttle = common::ThrottleConfig {
        max_transfers: args.max_transfers,
        chunk_throttle: args.chunk_throttle,
    };
    let tracing = common::TracingConfig { debug_log_file };
    let res = common::run(
        if args.progress || args.progress_delay.is_some() {
            Some(common::ProgressSettings {
                progress_delay: args.progress_delay.clone(),
            })
        } else {
            None
        },
        output,
        runtime,
        throttle,
        tracing,
        func,
    );
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
