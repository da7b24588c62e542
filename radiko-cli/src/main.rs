use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use radiko_engine::{CancellationToken, ProxyConfig, ProxyType, Recorder, RecorderConfig};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod error;
mod utils;

use cli::CliArgs;
use error::AppError;
use utils::progress::ProgressManager;
use utils::{format_bytes, format_duration, split_header};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) -> Result<(), AppError> {
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let result = match &args.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            let multi_writer = MakeWriterExt::and(std::io::stderr, log_file);
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_writer(multi_writer)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    result.map_err(|e| AppError::Initialization(e.to_string()))
}

fn proxy_from_args(args: &CliArgs) -> Result<Option<ProxyConfig>, AppError> {
    if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
        return Ok(None);
    }
    let Some(proxy_url) = args.proxy.as_ref() else {
        return Ok(None);
    };

    let proxy_type: ProxyType = args.proxy_type.parse()?;
    let mut proxy = ProxyConfig::parse(proxy_url, proxy_type)?;

    // Configure proxy authentication if both username and password are provided
    if let (Some(username), Some(password)) = (&args.proxy_user, &args.proxy_pass) {
        proxy = proxy.with_auth(username.as_str(), password.as_str());
    }

    info!(
        proxy = %proxy,
        proxy_type = ?proxy_type,
        has_auth = proxy.auth.is_some(),
        "Using explicit proxy configuration"
    );
    Ok(Some(proxy))
}

fn build_config(args: &CliArgs) -> Result<RecorderConfig, AppError> {
    if args.concurrency == 0 {
        return Err(AppError::InvalidInput(
            "--concurrency must be at least 1".to_string(),
        ));
    }

    let mut builder = RecorderConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .download_concurrency(args.concurrency)
        .segment_retry_count(args.retries)
        .ffmpeg_path(args.ffmpeg.clone())
        .raw_output(args.raw);

    for header in &args.headers {
        if let Some((name, value)) = split_header(header) {
            builder = builder.with_header(name, value);
        }
    }

    builder = match proxy_from_args(args)? {
        Some(proxy) => builder.with_proxy(proxy),
        None => builder.with_system_proxy(!args.no_proxy),
    };

    if let Some(deadline) = args.deadline {
        builder = builder.deadline(Duration::from_secs(deadline));
    }
    Ok(builder.build())
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();
    init_logging(&args)?;

    let config = build_config(&args)?;
    let output = args.output.clone().unwrap_or_else(|| args.default_output());
    info!(
        station = %args.station,
        from = %args.from,
        to = %args.to,
        output = %output.display(),
        "radiko time-shift recorder"
    );

    let progress_manager = if args.no_progress {
        ProgressManager::new_disabled()
    } else {
        ProgressManager::new()
    };
    let recorder = Recorder::new(config)?.with_progress(Arc::new(move |event| {
        progress_manager.handle_event(event);
    }));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the partial recording");
            ctrl_c_token.cancel();
        }
    });

    let result = recorder
        .record_with_cancel(&args.station, &args.from, &args.to, &output, cancel)
        .await?;

    info!(
        segments = result.segments_written,
        size = %format_bytes(result.bytes_written),
        covered = %format_duration(result.duration),
        expected = %format_duration(result.window.duration_std()),
        "Saved {}",
        output.display()
    );
    if !result.complete {
        warn!("Recording does not cover the whole window");
    }
    Ok(())
}
