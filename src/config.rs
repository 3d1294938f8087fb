//! Service configuration: raw settings in, validated [`ServiceConfig`] out.
//!
//! Frontends (the binary's CLI, tests) fill in [`Settings`] however they like. All checks
//! happen in [`ServiceConfig::from_settings`] so every problem is reported in one go.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::graph::GraphConfig;
use crate::marker::{DEFAULT_AUDIO_EXTENSION, DEFAULT_MARKER, MarkerPolicy};
use crate::models;
use crate::opts::Opts;
use crate::{Error, Result};

pub const DEFAULT_FOLDER: &str = "inbox";
pub const DEFAULT_START_DATE: &str = "2024-01-01T00:00:00Z";
pub const DEFAULT_MAX_MESSAGES: usize = 25;
pub const DEFAULT_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_MODEL: &str = "small";
pub const DEFAULT_MODEL_DIR: &str = "./models";
pub const DEFAULT_LANGUAGE: &str = "de";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// A single pass, then exit.
    #[default]
    Once,
    /// Pass, sleep for the interval, repeat.
    Daemon,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Once => "once",
            RunMode::Daemon => "daemon",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(RunMode::Once),
            "daemon" => Ok(RunMode::Daemon),
            other => Err(format!("unknown run mode '{other}' (expected once or daemon)")),
        }
    }
}

/// Unvalidated settings, as a frontend collected them.
#[derive(Debug)]
pub struct Settings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub mailbox: String,
    pub folder: String,
    pub sender: Option<String>,
    /// RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
    pub start_date: String,
    pub max_messages: usize,
    pub interval_secs: u64,
    pub marker: String,
    pub extension: String,
    pub model: String,
    pub model_dir: PathBuf,
    /// Language code, or `auto` to let the engine detect it.
    pub language: String,
    pub transcription_timeout_secs: Option<u64>,
    pub http_timeout_secs: u64,
    pub log_level: String,
    pub mode: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: SecretString::from(""),
            mailbox: String::new(),
            folder: DEFAULT_FOLDER.to_owned(),
            sender: None,
            start_date: DEFAULT_START_DATE.to_owned(),
            max_messages: DEFAULT_MAX_MESSAGES,
            interval_secs: DEFAULT_INTERVAL_SECS,
            marker: DEFAULT_MARKER.to_owned(),
            extension: DEFAULT_AUDIO_EXTENSION.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            language: DEFAULT_LANGUAGE.to_owned(),
            transcription_timeout_secs: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            mode: RunMode::Once.as_str().to_owned(),
        }
    }
}

/// Validated configuration. The core only ever sees plain values derived from this.
#[derive(Debug)]
pub struct ServiceConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub mailbox: String,
    pub folder: String,
    pub sender: Option<String>,
    pub cutoff: DateTime<Utc>,
    pub max_messages: usize,
    pub interval: Duration,
    pub marker: String,
    pub extension: String,
    pub model: String,
    pub model_dir: PathBuf,
    pub language: Option<String>,
    pub transcription_timeout: Option<Duration>,
    pub http_timeout: Duration,
    pub log_level: String,
    pub mode: RunMode,
}

impl ServiceConfig {
    /// Validate `settings`, collecting every problem before failing.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let mut problems = Vec::new();

        for (value, name) in [
            (&settings.tenant_id, "TENANT_ID"),
            (&settings.client_id, "CLIENT_ID"),
            (&settings.mailbox, "TARGET_EMAIL"),
            (&settings.folder, "MAIL_FOLDER"),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{name} is required"));
            }
        }
        if settings.client_secret.expose_secret().is_empty() {
            problems.push("CLIENT_SECRET is required".to_owned());
        }

        let cutoff = parse_cutoff(&settings.start_date).unwrap_or_else(|err| {
            problems.push(err);
            DateTime::<Utc>::MIN_UTC
        });

        if settings.max_messages == 0 {
            problems.push("MAX_EMAILS_PER_RUN must be at least 1".to_owned());
        }
        if settings.interval_secs == 0 {
            problems.push("CHECK_INTERVAL_SECONDS must be at least 1".to_owned());
        }
        if settings.marker.trim().is_empty() {
            problems.push("TRANSCRIPTION_MARKER must not be empty".to_owned());
        }
        if settings.extension.trim_start_matches('.').trim().is_empty() {
            problems.push("AUDIO_EXTENSION must not be empty".to_owned());
        }
        if models::lookup(&settings.model).is_none() {
            problems.push(format!(
                "WHISPER_MODEL '{}' is not one of: {}",
                settings.model,
                models::names().collect::<Vec<_>>().join(", ")
            ));
        }

        let language = parse_language(&settings.language).unwrap_or_else(|err| {
            problems.push(err);
            None
        });

        if settings.transcription_timeout_secs == Some(0) {
            problems.push("TRANSCRIPTION_TIMEOUT_SECONDS must be at least 1".to_owned());
        }
        if settings.http_timeout_secs == 0 {
            problems.push("HTTP_TIMEOUT_SECONDS must be at least 1".to_owned());
        }

        let log_level = settings.log_level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            problems.push(format!(
                "LOG_LEVEL '{}' is not one of: {}",
                settings.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        let mode = settings.mode.parse::<RunMode>().unwrap_or_else(|err| {
            problems.push(format!("RUN_MODE: {err}"));
            RunMode::Once
        });

        if !problems.is_empty() {
            return Err(Error::Config(problems));
        }

        Ok(Self {
            tenant_id: settings.tenant_id.trim().to_owned(),
            client_id: settings.client_id.trim().to_owned(),
            client_secret: settings.client_secret,
            mailbox: settings.mailbox.trim().to_owned(),
            folder: settings.folder.trim().to_owned(),
            sender: settings
                .sender
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
            cutoff,
            max_messages: settings.max_messages,
            interval: Duration::from_secs(settings.interval_secs),
            marker: settings.marker,
            extension: settings.extension,
            model: settings.model,
            model_dir: settings.model_dir,
            language,
            transcription_timeout: settings.transcription_timeout_secs.map(Duration::from_secs),
            http_timeout: Duration::from_secs(settings.http_timeout_secs),
            log_level,
            mode,
        })
    }

    pub fn marker_policy(&self) -> MarkerPolicy {
        MarkerPolicy::new(self.marker.clone(), &self.extension)
    }

    pub fn transcription_opts(&self) -> Opts {
        Opts {
            language: self.language.clone(),
            timeout: self.transcription_timeout,
        }
    }

    /// Connection settings for the Graph mailbox.
    pub fn graph_config(&self) -> GraphConfig {
        let mut graph = GraphConfig::new(
            &self.tenant_id,
            &self.client_id,
            SecretString::from(self.client_secret.expose_secret()),
            &self.mailbox,
        );
        graph.folder = self.folder.clone();
        graph.sender = self.sender.clone();
        graph.http_timeout = self.http_timeout;
        graph
    }

    /// Settings rendered for the startup log. The client secret is never included.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("mailbox: {}", self.mailbox),
            format!("folder: {}", self.folder),
            format!("sender filter: {}", self.sender.as_deref().unwrap_or("(none)")),
            format!("tenant: {}", self.tenant_id),
            format!("client id: {}", self.client_id),
            format!("start date: {}", self.cutoff.to_rfc3339()),
            format!("max messages per run: {}", self.max_messages),
            format!("mode: {}", self.mode),
        ];
        if self.mode == RunMode::Daemon {
            lines.push(format!("interval: {}s", self.interval.as_secs()));
        }
        lines.extend([
            format!("model: {} ({})", self.model, self.model_dir.display()),
            format!("language: {}", self.language.as_deref().unwrap_or("auto")),
            format!(
                "transcription timeout: {}",
                self.transcription_timeout
                    .map_or_else(|| "none".to_owned(), |t| format!("{}s", t.as_secs()))
            ),
            format!("marker: {}", self.marker),
        ]);
        lines.join("\n")
    }
}

fn parse_cutoff(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            format!("START_DATE '{raw}' is not an RFC 3339 timestamp or YYYY-MM-DD date")
        })
}

fn parse_language(raw: &str) -> std::result::Result<Option<String>, String> {
    let lang = raw.trim().to_ascii_lowercase();
    if lang.is_empty() || lang == "auto" {
        return Ok(None);
    }
    if (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_lowercase()) {
        return Ok(Some(lang));
    }
    Err(format!("WHISPER_LANGUAGE '{raw}' is not a language code or 'auto'"))
}
