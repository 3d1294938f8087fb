//! Microsoft Graph implementation of [`Mailbox`].
//!
//! Blocking `reqwest` client plus an app-only (client-credentials) token. One
//! [`GraphMailbox`] is built at startup and reused for every run, so the HTTP connection
//! pool and the cached token are process-wide.

mod auth;
mod types;

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use secrecy::SecretString;
use tracing::{debug, info};

use crate::mailbox::{Mailbox, MailboxError, MailboxErrorKind, MailboxResult};
use crate::message::{Body, Message};
use crate::text::truncate;
use crate::{Error, Result};

use auth::TokenProvider;
use types::{BodyPatch, ItemBody, MessagePage, ReadStatePatch};

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";

const PAGE_SIZE: usize = 50;
const MESSAGE_FIELDS: &str = "id,receivedDateTime,isRead,subject,from,body,hasAttachments";
const ATTACHMENT_EXPAND: &str = "attachments($select=id,name,contentType,size)";

/// Connection settings for [`GraphMailbox`].
#[derive(Debug)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Mailbox user principal name or id.
    pub mailbox: String,
    /// Well-known folder name (`inbox`) or folder id.
    pub folder: String,
    /// Only list messages from this sender address.
    pub sender: Option<String>,
    pub http_timeout: Duration,
    pub graph_base_url: String,
    pub login_base_url: String,
}

impl GraphConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        mailbox: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
            mailbox: mailbox.into(),
            folder: "inbox".to_owned(),
            sender: None,
            http_timeout: Duration::from_secs(60),
            graph_base_url: GRAPH_BASE_URL.to_owned(),
            login_base_url: LOGIN_BASE_URL.to_owned(),
        }
    }
}

pub struct GraphMailbox {
    http: Client,
    auth: TokenProvider,
    base: Url,
    mailbox: String,
    folder: String,
    sender: Option<String>,
}

impl GraphMailbox {
    pub fn new(config: GraphConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("mailscribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;

        let base = Url::parse(&config.graph_base_url)
            .map_err(|e| Error::msg(format!("invalid Graph base URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::msg(format!(
                "invalid Graph base URL: {}",
                config.graph_base_url
            )));
        }

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.login_base_url.trim_end_matches('/'),
            config.tenant_id
        );

        info!(
            mailbox = %config.mailbox,
            folder = %config.folder,
            "graph mailbox configured"
        );

        Ok(Self {
            http,
            auth: TokenProvider::new(token_url, config.client_id, config.client_secret),
            base,
            mailbox: config.mailbox,
            folder: config.folder,
            sender: config.sender,
        })
    }

    /// `{base}/users/{mailbox}/{segments...}` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> MailboxResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MailboxError::connectivity("Graph base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["users", self.mailbox.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> MailboxResult<RequestBuilder> {
        let token = self.auth.bearer(&self.http)?;
        Ok(req.bearer_auth(token))
    }

    /// Pass successful responses through; turn everything else into a classified error.
    fn check(&self, resp: Response, what: &str) -> MailboxResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate();
        }
        let body = resp.text().unwrap_or_default();
        Err(MailboxError::new(
            classify_status(status),
            format!("{what}: HTTP {status}: {}", truncate(body.trim(), 200)),
        ))
    }

    fn patch_message<T: serde::Serialize>(
        &self,
        message_id: &str,
        payload: &T,
        what: &str,
    ) -> MailboxResult<()> {
        let url = self.url(&["messages", message_id])?;
        let resp = self
            .authorized(self.http.patch(url))?
            .json(payload)
            .send()
            .map_err(|e| transport_error(what, e))?;
        self.check(resp, what).map(drop)
    }
}

impl Mailbox for GraphMailbox {
    fn list_messages(
        &self,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> MailboxResult<Vec<Message>> {
        let filter = list_filter(since, self.sender.as_deref());
        let top = limit.map_or(PAGE_SIZE, |l| l.clamp(1, PAGE_SIZE)).to_string();
        let url = self.url(&["mailFolders", &self.folder, "messages"])?;

        let mut req = self.authorized(self.http.get(url))?.query(&[
            ("$filter", filter.as_str()),
            ("$orderby", "receivedDateTime asc"),
            ("$select", MESSAGE_FIELDS),
            ("$expand", ATTACHMENT_EXPAND),
            ("$top", top.as_str()),
        ]);

        let mut messages = Vec::new();
        let mut pages = 0usize;
        loop {
            let resp = req
                .send()
                .map_err(|e| MailboxError::connectivity(format!("list messages: {e}")))?;
            let status = resp.status();
            let resp = self.check(resp, "list messages").map_err(|err| {
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    MailboxError::connectivity(err.message)
                } else {
                    err
                }
            })?;
            let page: MessagePage = resp.json().map_err(|e| {
                MailboxError::indeterminate(format!("list messages: malformed response: {e}"))
            })?;
            pages += 1;

            messages.extend(page.value.into_iter().map(Message::from));
            if let Some(limit) = limit
                && messages.len() >= limit
            {
                messages.truncate(limit);
                break;
            }

            match page.next_link {
                Some(next) => req = self.authorized(self.http.get(next))?,
                None => break,
            }
        }

        debug!(count = messages.len(), pages, "listed messages");
        Ok(messages)
    }

    fn get_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> MailboxResult<Vec<u8>> {
        const WHAT: &str = "download attachment";
        let url = self.url(&["messages", message_id, "attachments", attachment_id, "$value"])?;
        let resp = self
            .authorized(self.http.get(url))?
            .send()
            .map_err(|e| transport_error(WHAT, e))?;
        let bytes = self
            .check(resp, WHAT)?
            .bytes()
            .map_err(|e| transport_error(WHAT, e))?;
        Ok(bytes.to_vec())
    }

    fn update_body(&self, message_id: &str, body: &Body) -> MailboxResult<()> {
        let patch = BodyPatch {
            body: ItemBody::from(body),
        };
        self.patch_message(message_id, &patch, "update body")
    }

    fn set_read_state(&self, message_id: &str, is_read: bool) -> MailboxResult<()> {
        self.patch_message(message_id, &ReadStatePatch { is_read }, "set read state")
    }
}

/// Server-side listing filter. The cutoff is truncated to whole seconds, which can only
/// widen the result; the eligibility filter re-checks the exact cutoff.
fn list_filter(since: DateTime<Utc>, sender: Option<&str>) -> String {
    let mut filter = format!(
        "receivedDateTime ge {} and hasAttachments eq true",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if let Some(sender) = sender {
        filter.push_str(&format!(
            " and from/emailAddress/address eq '{}'",
            sender.replace('\'', "''")
        ));
    }
    filter
}

/// Non-success status to error kind. Server errors and throttling leave the outcome of a
/// mutation unknown; any other client error means the request was refused.
fn classify_status(status: StatusCode) -> MailboxErrorKind {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        MailboxErrorKind::Indeterminate
    } else {
        MailboxErrorKind::Rejected
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> MailboxError {
    MailboxError::indeterminate(format!("{what}: {err}"))
}
