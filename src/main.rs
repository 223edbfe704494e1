//! lamco-mjpeg-server - Wayland screen capture as an MJPEG stream
//!
//! Entry point for the server binary.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use lamco_mjpeg_server::config::{Config, LoggingConfig};
use lamco_mjpeg_server::server::StreamServer;
use lamco_mjpeg_server::utils::format_user_error;
use lamco_mjpeg_server::video::FrameBroadcastBuffer;

/// Command-line arguments for lamco-mjpeg-server
#[derive(Parser, Debug)]
#[command(name = "lamco-mjpeg-server")]
#[command(version, about = "Stream the Wayland desktop as MJPEG over HTTP", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/lamco-mjpeg-server/config.toml")]
    pub config: String,

    /// Listen address
    #[arg(short, long, env = "LAMCO_MJPEG_LISTEN_ADDR")]
    pub listen: Option<String>,

    /// Listen port (overrides the config file's port)
    #[arg(short, long, env = "LAMCO_MJPEG_PORT")]
    pub port: Option<u16>,

    /// JPEG quality (1-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Directory served for non-stream paths
    #[arg(short, long)]
    pub document_root: Option<PathBuf>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before logging so [logging] applies; the failure is reported once logging is up
    let (config, config_error) = match Config::load(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default_config(), Some(e)),
    };

    let _log_guard = init_logging(&args, &config.logging)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-mjpeg-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    lamco_mjpeg_server::utils::log_startup_diagnostics();

    if let Some(e) = config_error {
        warn!("Failed to load config {}: {:#}, using defaults", args.config, e);
    }

    let config = config.with_overrides(
        args.listen.clone(),
        args.port,
        args.quality,
        args.document_root.clone(),
    );
    if let Err(e) = config.validate() {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    info!("Configuration loaded successfully");
    tracing::debug!("Config: {:?}", config);

    let config = Arc::new(config);
    let buffer = Arc::new(FrameBroadcastBuffer::new());
    let shutdown = CancellationToken::new();

    let server = match StreamServer::bind(&config.server, Arc::clone(&buffer)).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return Err(e);
        }
    };

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        ctrl_c_token.cancel();
    });

    let pipeline = tokio::spawn({
        let config = Arc::clone(&config);
        let buffer = Arc::clone(&buffer);
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = lamco_mjpeg_server::run_capture_pipeline(config, buffer, shutdown).await {
                error!("Screen capture unavailable, still serving HTTP: {:#}", e);
                eprintln!("{}", format_user_error(&e));
            }
        }
    });

    info!("Starting MJPEG server");
    let result = server.run(shutdown.clone()).await;

    shutdown.cancel();
    pipeline.await.context("Capture pipeline task panicked")?;

    if let Err(e) = result {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    info!("lamco-mjpeg-server shut down");
    Ok(())
}

/// Log level from `-v` count, falling back to `[logging] level`
fn log_level<'a>(verbose: u8, logging: &'a LoggingConfig) -> &'a str {
    match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

fn fmt_layer<W>(format: &str, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);

    match format {
        "json" => layer.json().boxed(),
        "compact" => layer.compact().boxed(),
        _ => layer.pretty().boxed(),
    }
}

/// Stdout plus an optional non-blocking file
///
/// `--log-file` wins over `[logging] log_dir`, which rotates daily. The
/// returned guard flushes the file writer on drop.
fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = log_level(args.verbose, logging);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // zbus logs every message at debug
        tracing_subscriber::EnvFilter::new(format!("lamco_mjpeg_server={},zbus=warn,warn", level))
    });

    let mut layers = vec![fmt_layer(&args.log_format, std::io::stdout, true)];

    let (file_writer, guard, destination) = if let Some(path) = &args.log_file {
        let file = File::create(path).context(format!("Failed to create log file {}", path))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        (Some(writer), Some(guard), path.clone())
    } else if let Some(dir) = &logging.log_dir {
        let appender = tracing_appender::rolling::daily(dir, "lamco-mjpeg-server.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(writer), Some(guard), dir.display().to_string())
    } else {
        (None, None, String::new())
    };

    if let Some(writer) = file_writer {
        layers.push(fmt_layer(&args.log_format, writer, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    if guard.is_some() {
        info!("Logging to file: {}", destination);
    }

    Ok(guard)
}
