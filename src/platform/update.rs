//! Decoding of inbound Telegram webhook updates.
//!
//! Telegram posts several update shapes that all carry a message-like object.
//! Every field is optional here: a half-formed update should still yield
//! whatever can be salvaged rather than fail the whole request.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::IncomingMessage;

#[derive(Debug, Default, Deserialize)]
struct RawUpdate {
    #[serde(default, deserialize_with = "lenient")]
    message: Option<RawMessage>,
    #[serde(default, deserialize_with = "lenient")]
    edited_message: Option<RawMessage>,
    #[serde(default, deserialize_with = "lenient")]
    channel_post: Option<RawMessage>,
    #[serde(default, deserialize_with = "lenient")]
    callback_query: Option<RawCallbackQuery>,
    /// Some callback-query flows put the payload at the top level.
    #[serde(default, deserialize_with = "lenient")]
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCallbackQuery {
    #[serde(default, deserialize_with = "lenient")]
    message: Option<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "lenient")]
    message_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    chat: Option<RawChat>,
    #[serde(default, deserialize_with = "lenient")]
    from: Option<RawUser>,
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    caption: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChat {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<i64>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    chat_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    last_name: Option<String>,
}

/// A field of the wrong type reads as absent instead of failing the update.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// The update kinds the relay answers, in precedence order.
#[derive(Debug)]
pub enum UpdateKind {
    Message(RawMessage),
    EditedMessage(RawMessage),
    ChannelPost(RawMessage),
    CallbackQuery(RawMessage),
}

impl UpdateKind {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateKind::Message(_) => "message",
            UpdateKind::EditedMessage(_) => "edited_message",
            UpdateKind::ChannelPost(_) => "channel_post",
            UpdateKind::CallbackQuery(_) => "callback_query",
        }
    }

    fn into_message(self) -> RawMessage {
        match self {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::CallbackQuery(m) => m,
        }
    }
}

/// A decoded update: the selected kind plus the top-level `data` fallback.
#[derive(Debug)]
pub struct Update {
    pub kind: UpdateKind,
    data: Option<String>,
}

impl Update {
    /// Select the message object by precedence. Returns `None` when the body
    /// is not an update or carries no message object.
    pub fn from_json(body: &Value) -> Option<Self> {
        let raw: RawUpdate = match serde_json::from_value(body.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Update body did not decode: {}", e);
                return None;
            }
        };

        let kind = if let Some(m) = raw.message {
            UpdateKind::Message(m)
        } else if let Some(m) = raw.edited_message {
            UpdateKind::EditedMessage(m)
        } else if let Some(m) = raw.channel_post {
            UpdateKind::ChannelPost(m)
        } else if let Some(m) = raw.callback_query.and_then(|cb| cb.message) {
            UpdateKind::CallbackQuery(m)
        } else {
            return None;
        };

        Some(Self {
            kind,
            data: raw.data,
        })
    }

    /// Normalize into an [`IncomingMessage`]. `None` if no chat id can be
    /// found, since there is nowhere to reply.
    pub fn normalize(self) -> Option<IncomingMessage> {
        let data = self.data;
        let msg = self.kind.into_message();

        let chat_id = match &msg.chat {
            Some(chat) => chat.id,
            None => msg.from.as_ref().and_then(|f| f.id),
        }?;

        let text = non_empty(msg.text)
            .or_else(|| non_empty(msg.caption))
            .or_else(|| non_empty(data))
            .unwrap_or_default();

        let (from_id, from_name) = match &msg.from {
            Some(user) => {
                let name = format!(
                    "{} {}",
                    user.first_name.as_deref().unwrap_or(""),
                    user.last_name.as_deref().unwrap_or("")
                );
                (user.id, name.trim().to_string())
            }
            None => (None, String::new()),
        };

        let chat_type = msg
            .chat
            .and_then(|c| non_empty(c.chat_type))
            .unwrap_or_else(|| "private".to_string());

        Some(IncomingMessage {
            chat_id,
            text,
            message_id: msg.message_id,
            from_id,
            from_name,
            chat_type,
        })
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
