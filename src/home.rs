//! Client for the remote HOME server: per-site configuration and chat replies.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::platform::IncomingMessage;

/// Per-site kill-switches and admin text, owned by the HOME server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    site_off: Option<bool>,
    #[serde(default)]
    bot_off: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    broadcast: Option<String>,
}

impl SiteConfig {
    pub fn site_off(&self) -> bool {
        self.site_off.unwrap_or(false)
    }

    pub fn bot_off(&self) -> bool {
        self.bot_off.unwrap_or(false)
    }

    /// Text shown in chat while the site is disabled.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Admin broadcast. Shown by the dashboard, not relayed to chats.
    pub fn broadcast(&self) -> &str {
        self.broadcast.as_deref().unwrap_or("")
    }
}

/// Bot persona fields the site owner may include in the webhook body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotProfile {
    pub owner_name: String,
    pub bot_name: String,
    pub username: String,
    pub gender: String,
    pub personality: String,
    pub group_link: String,
}

impl BotProfile {
    /// Read the profile from a webhook body. Every field is optional and
    /// defaults to an empty string; non-string values are ignored.
    pub fn from_body(body: &Value) -> Self {
        Self {
            owner_name: first_string(body, &["ownerName", "owner"]),
            bot_name: first_string(body, &["botName", "name"]),
            username: first_string(body, &["botUsername", "username"]),
            gender: first_string(body, &["gender"]),
            personality: first_string(body, &["personality"]),
            group_link: first_string(body, &["groupLink"]),
        }
    }
}

fn first_string(body: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| body.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or("")
        .to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    pub owner_name: String,
    pub bot_name: String,
    pub username: String,
    pub gender: String,
    pub personality: String,
    pub group_link: String,
    #[serde(rename = "_meta")]
    pub meta: ForwardMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_id: Option<i64>,
    pub from_name: String,
    pub chat_type: String,
}

impl ForwardPayload {
    pub fn new(incoming: &IncomingMessage, site_id: Option<&str>, profile: BotProfile) -> Self {
        Self {
            message: incoming.text.clone(),
            site_id: site_id.map(str::to_string),
            owner_name: profile.owner_name,
            bot_name: profile.bot_name,
            username: profile.username,
            gender: profile.gender,
            personality: profile.personality,
            group_link: profile.group_link,
            meta: ForwardMeta {
                from_id: incoming.from_id,
                from_name: incoming.from_name.clone(),
                chat_type: incoming.chat_type.clone(),
            },
        }
    }
}

/// What the Chat API made of a forwarded message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    /// `ok: true`. Blank replies are kept as-is; the relay substitutes its
    /// fallback text.
    Reply(String),
    /// Parsed, but `ok` was not `true`.
    Rejected { error: Option<String>, detail: Value },
    /// No usable answer: transport failure, error status, or a body that is
    /// not JSON. `status` is absent when no HTTP response arrived.
    Unavailable { status: Option<u16> },
}

pub struct HomeClient {
    client: reqwest::Client,
    base_url: String,
}

impl HomeClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the current configuration of `site_id`. Errors on transport
    /// failure, a non-success status or an unparseable body.
    pub async fn site_config(&self, site_id: &str) -> Result<SiteConfig> {
        let url = format!("{}/api/config", self.base_url);
        debug!("Fetching site config from {} for {}", url, site_id);

        let response = self
            .client
            .get(&url)
            .query(&[("siteId", site_id)])
            .send()
            .await
            .context("Failed to reach HOME config API")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HOME config API returned {}", status);
        }

        response
            .json()
            .await
            .context("Failed to parse HOME config response")
    }

    /// Forward a message to the Chat API.
    ///
    /// Upstream trouble is reported through [`ChatReply`]; `Err` is reserved
    /// for faults on this side, such as a request that cannot be built.
    pub async fn chat(&self, payload: &ForwardPayload) -> Result<ChatReply> {
        let url = format!("{}/api/chat", self.base_url);
        debug!("Forwarding message to {}", url);

        let response = match self.client.post(&url).json(payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(e).context("Failed to build HOME chat request");
            }
            Err(e) => {
                error!("HOME chat API unreachable: {}", e);
                return Ok(ChatReply::Unavailable { status: None });
            }
        };

        let status = response.status();
        let data = match response.json::<Value>().await {
            Ok(Value::Null) => None,
            Ok(data) => Some(data),
            Err(e) => {
                error!("Invalid JSON from HOME chat API: {}", e);
                None
            }
        };

        let data = match data {
            Some(data) if status.is_success() => data,
            data => {
                error!("HOME chat API returned error {}: {:?}", status, data);
                return Ok(ChatReply::Unavailable {
                    status: Some(status.as_u16()),
                });
            }
        };

        // Only a JSON `true` counts; `1` or `"true"` are rejections.
        if data.get("ok").and_then(Value::as_bool) != Some(true) {
            error!("HOME chat API response not ok: {}", data);
            let error = data
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .map(str::to_string);
            return Ok(ChatReply::Rejected {
                error,
                detail: data,
            });
        }

        Ok(ChatReply::Reply(reply_text(data.get("reply"))))
    }
}

fn reply_text(reply: Option<&Value>) -> String {
    match reply {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
