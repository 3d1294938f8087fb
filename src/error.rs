use std::error::Error as StdError;

use thiserror::Error;

use crate::mailbox::MailboxError;

/// mailscribe's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// mailscribe's crate-wide error type.
///
/// Only errors that stop a whole run (or stop the service from starting) end up here.
/// Per-message problems are captured into outcomes and never surface as `Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more settings are missing or invalid. Each problem is on its own line.
    #[error("configuration errors:\n{}", format_problems(.0))]
    Config(Vec<String>),

    /// The mailbox could not be reached, authenticated against, or listed.
    #[error("mailbox unavailable: {0}")]
    Mailbox(#[from] MailboxError),

    /// The speech-to-text model could not be located or loaded.
    #[error("model unavailable: {0}")]
    Model(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

fn format_problems(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_lists_every_problem() {
        let err = Error::Config(vec!["TENANT_ID is required".into(), "bad model".into()]);
        let text = err.to_string();
        assert!(text.starts_with("configuration errors:\n"));
        assert!(text.contains("  - TENANT_ID is required\n"));
        assert!(text.ends_with("  - bad model"));
    }

    #[test]
    fn anyhow_errors_keep_their_context_chain() {
        let err: Error = anyhow::anyhow!("root cause").context("outer").into();
        assert_eq!(err.to_string(), "outer: root cause");
    }
}
