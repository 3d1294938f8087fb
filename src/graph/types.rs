//! Wire types for the subset of Microsoft Graph we use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Attachment, Body, BodyKind, Message};

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePage {
    #[serde(default)]
    pub value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphMessage {
    pub id: String,
    pub received_date_time: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    pub subject: Option<String>,
    pub from: Option<Recipient>,
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub attachments: Vec<GraphAttachment>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemBody {
    pub content_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Recipient {
    pub email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmailAddress {
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphAttachment {
    pub id: String,
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BodyPatch {
    pub body: ItemBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReadStatePatch {
    pub is_read: bool,
}

impl From<&Body> for ItemBody {
    fn from(body: &Body) -> Self {
        Self {
            content_type: body.kind.as_str().to_owned(),
            content: body.content.clone(),
        }
    }
}

impl From<ItemBody> for Body {
    fn from(body: ItemBody) -> Self {
        let kind = if body.content_type.eq_ignore_ascii_case("html") {
            BodyKind::Html
        } else {
            BodyKind::Text
        };
        Body {
            kind,
            content: body.content,
        }
    }
}

impl From<GraphMessage> for Message {
    fn from(m: GraphMessage) -> Self {
        Message {
            id: m.id,
            received_at: m.received_date_time,
            is_read: m.is_read,
            body: m.body.map(Body::from).unwrap_or_default(),
            attachments: m
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    id: a.id,
                    filename: a.name.unwrap_or_default(),
                    content_type: a.content_type,
                    size: a.size,
                })
                .collect(),
            subject: m.subject,
            sender: m.from.and_then(|r| r.email_address).and_then(|e| e.address),
        }
    }
}
