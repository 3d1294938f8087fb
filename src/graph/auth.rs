//! OAuth2 client-credentials tokens for Graph, cached until shortly before expiry.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::types::TokenResponse;
use crate::mailbox::{MailboxError, MailboxResult};
use crate::text::truncate;

pub(crate) const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are refreshed this long before Graph says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(value: SecretString, expires_in: Duration, now: Instant) -> Self {
        Self {
            value,
            refresh_at: now + expires_in.saturating_sub(REFRESH_MARGIN),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

pub(crate) struct TokenProvider {
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub(crate) fn new(token_url: String, client_id: String, client_secret: SecretString) -> Self {
        Self {
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    /// A valid access token, fetching a new one when the cached one is due for refresh.
    ///
    /// Any failure here is a connectivity error: without a token nothing else can work.
    pub(crate) fn bearer(&self, http: &Client) -> MailboxResult<String> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| MailboxError::connectivity("token cache poisoned"))?;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.expose_secret().to_owned());
        }

        debug!("requesting access token");
        let resp = http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .map_err(|e| MailboxError::connectivity(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(MailboxError::connectivity(format!(
                "authentication failed: HTTP {status}: {}",
                truncate(&body, 200)
            )));
        }

        let token: TokenResponse = resp
            .json()
            .map_err(|e| MailboxError::connectivity(format!("malformed token response: {e}")))?;

        let bearer = token.access_token.clone();
        *cached = Some(CachedToken::new(
            SecretString::from(token.access_token),
            Duration::from_secs(token.expires_in),
            Instant::now(),
        ));
        info!(expires_in_s = token.expires_in, "access token acquired");
        Ok(bearer)
    }

    /// Forget the cached token, e.g. after Graph answered 401.
    pub(crate) fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            cached.take();
        }
    }
}
