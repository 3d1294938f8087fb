use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use secrecy::SecretString;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use mailscribe::config::{
    DEFAULT_FOLDER, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INTERVAL_SECS, DEFAULT_LANGUAGE,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_MESSAGES, DEFAULT_MODEL, DEFAULT_MODEL_DIR, DEFAULT_START_DATE,
};
use mailscribe::logging::LogFormat;
use mailscribe::marker::{DEFAULT_AUDIO_EXTENSION, DEFAULT_MARKER};
use mailscribe::{
    AbortReason, Coordinator, GraphMailbox, RunMode, RunSummary, ServiceConfig, Settings,
    Transcriber, WhisperBackend, models,
};

type Service = Arc<Coordinator<GraphMailbox>>;

#[derive(Parser, Debug)]
#[command(name = "mailscribe", version)]
#[command(about = "Transcribe voicemail attachments and annotate each email exactly once")]
struct Args {
    /// Azure AD tenant id.
    #[arg(long, env = "TENANT_ID")]
    tenant_id: Option<String>,

    /// App registration client id.
    #[arg(long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// App registration client secret.
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Mailbox to process (user principal name).
    #[arg(long, env = "TARGET_EMAIL")]
    mailbox: Option<String>,

    #[arg(long, env = "MAIL_FOLDER", default_value = DEFAULT_FOLDER)]
    folder: String,

    /// Only consider messages from this sender address.
    #[arg(long, env = "VOICEMAIL_SENDER")]
    sender: Option<String>,

    /// Ignore messages received before this point (RFC 3339 or YYYY-MM-DD).
    #[arg(long, env = "START_DATE", default_value = DEFAULT_START_DATE)]
    start_date: String,

    #[arg(long, env = "MAX_EMAILS_PER_RUN", default_value_t = DEFAULT_MAX_MESSAGES)]
    max_messages: usize,

    /// Seconds between runs in daemon mode.
    #[arg(long, env = "CHECK_INTERVAL_SECONDS", default_value_t = DEFAULT_INTERVAL_SECS)]
    interval: u64,

    #[arg(long, env = "TRANSCRIPTION_MARKER", default_value = DEFAULT_MARKER)]
    marker: String,

    #[arg(long, env = "AUDIO_EXTENSION", default_value = DEFAULT_AUDIO_EXTENSION)]
    extension: String,

    /// Whisper model size: tiny, base, small, medium or large.
    #[arg(long, env = "WHISPER_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "WHISPER_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    /// Spoken language, or `auto`.
    #[arg(long, env = "WHISPER_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Per-attachment transcription timeout in seconds.
    #[arg(long, env = "TRANSCRIPTION_TIMEOUT_SECONDS")]
    transcription_timeout: Option<u64>,

    #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    http_timeout: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    #[arg(long, env = "LOG_FORMAT", default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// `once` (single pass) or `daemon` (repeat every interval).
    #[arg(long, env = "RUN_MODE", default_value = "once")]
    mode: String,

    /// Download the model if it is missing from the model directory.
    #[arg(long)]
    fetch_model: bool,
}

impl Args {
    fn into_settings(self) -> Settings {
        Settings {
            tenant_id: self.tenant_id.unwrap_or_default(),
            client_id: self.client_id.unwrap_or_default(),
            client_secret: SecretString::from(self.client_secret.unwrap_or_default()),
            mailbox: self.mailbox.unwrap_or_default(),
            folder: self.folder,
            sender: self.sender,
            start_date: self.start_date,
            max_messages: self.max_messages,
            interval_secs: self.interval,
            marker: self.marker,
            extension: self.extension,
            model: self.model,
            model_dir: self.model_dir,
            language: self.language,
            transcription_timeout_secs: self.transcription_timeout,
            http_timeout_secs: self.http_timeout,
            log_level: self.log_level,
            mode: self.mode,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    mailscribe::init_logging(&args.log_level, args.log_format);

    let fetch_model = args.fetch_model;
    let config = match ServiceConfig::from_settings(args.into_settings()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };

    match run(config, fetch_model).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "mailscribe failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServiceConfig, fetch_model: bool) -> Result<ExitCode> {
    info!(mode = %config.mode, "starting mailscribe\n{}", config.summary());

    let mode = config.mode;
    let cutoff = config.cutoff;
    let max_messages = config.max_messages;
    let interval = config.interval;

    // Model loading, downloads and the blocking HTTP client all stay off the async workers.
    let coordinator = tokio::task::spawn_blocking(move || build(&config, fetch_model))
        .await
        .context("startup task panicked")?
        .context("failed to initialize service")?;
    let service: Service = Arc::new(coordinator);

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(watch_signals(service.stop_flag(), Arc::clone(&shutdown)));

    let code = match mode {
        RunMode::Once => match run_pass(&service, cutoff, max_messages).await {
            Ok(summary) if engine_aborted(&summary) => ExitCode::FAILURE,
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %format!("{err:#}"), "run failed");
                ExitCode::FAILURE
            }
        },
        RunMode::Daemon => {
            daemon(&service, cutoff, max_messages, interval, &shutdown).await;
            ExitCode::SUCCESS
        }
    };

    // The blocking HTTP client must not be dropped on an async worker.
    tokio::task::spawn_blocking(move || drop(service))
        .await
        .context("shutdown task panicked")?;

    info!("mailscribe stopped");
    Ok(code)
}

fn build(
    config: &ServiceConfig,
    fetch_model: bool,
) -> mailscribe::Result<Coordinator<GraphMailbox>> {
    let model_path = models::ensure_model(&config.model_dir, &config.model, fetch_model)?;
    let backend = WhisperBackend::new(&model_path)?;
    let transcriber = Transcriber::new(backend, config.transcription_opts())?;
    let mailbox = GraphMailbox::new(config.graph_config())?;
    Ok(Coordinator::new(mailbox, transcriber, config.marker_policy()))
}

async fn run_pass(
    service: &Service,
    cutoff: DateTime<Utc>,
    max_messages: usize,
) -> Result<RunSummary> {
    let service = Arc::clone(service);
    let summary = tokio::task::spawn_blocking(move || service.run(cutoff, Some(max_messages)))
        .await
        .context("run task panicked")??;
    Ok(summary)
}

async fn daemon(
    service: &Service,
    cutoff: DateTime<Utc>,
    max_messages: usize,
    interval: Duration,
    shutdown: &Notify,
) {
    info!(interval_s = interval.as_secs(), "daemon mode");
    let stop = service.stop_flag();

    loop {
        match run_pass(service, cutoff, max_messages).await {
            Ok(summary) if summary.aborted == Some(AbortReason::Shutdown) => break,
            Ok(_) => {}
            Err(err) => error!(error = %format!("{err:#}"), "run failed; retrying next interval"),
        }

        if stop.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => break,
        }
    }
}

fn engine_aborted(summary: &RunSummary) -> bool {
    matches!(summary.aborted, Some(AbortReason::ResourceExhausted(_)))
}

/// First SIGINT/SIGTERM: finish the current message, then stop. Second one: exit now.
async fn watch_signals(stop: Arc<AtomicBool>, shutdown: Arc<Notify>) {
    shutdown_signal().await;
    warn!("shutdown requested; finishing the current message");
    stop.store(true, Ordering::SeqCst);
    shutdown.notify_one();

    shutdown_signal().await;
    warn!("second signal received; exiting immediately");
    std::process::exit(130);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
