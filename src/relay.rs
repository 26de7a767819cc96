use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::home::{BotProfile, ChatReply, ForwardPayload, HomeClient};
use crate::platform::telegram::{TelegramBot, TelegramSender};
use crate::platform::update::Update;
use crate::platform::IncomingMessage;

const DEFAULT_DISABLED_MESSAGE: &str = "This website is currently disabled by the administrator.";
const EMPTY_REPLY_FALLBACK: &str = "Sorry, I couldn't generate a reply.";
const UNAVAILABLE_MESSAGE: &str =
    "⚠️ Bot is temporarily unable to respond. Please try again later.";
const UPSTREAM_ERROR_FALLBACK: &str = "⚠️ Bot error from upstream.";
const SERVER_ERROR_MESSAGE: &str = "⚠️ Something went wrong on the bot server. Try later.";

/// Per-request identifiers taken from the webhook URL.
#[derive(Debug, Clone, Default)]
pub struct WebhookParams {
    pub token: Option<String>,
    pub site_id: Option<String>,
}

/// How a webhook invocation ended. The server maps each to a status and body.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing actionable in the update.
    Ignored,
    /// No bot token anywhere, so nothing was sent.
    MissingToken,
    /// `siteOff`: the disabled notice was sent.
    SiteDisabled,
    /// `botOff`: deliberately silent.
    BotDisabled,
    Replied,
    /// The Chat API gave no usable answer. `status` is its HTTP status, if any.
    UpstreamUnavailable { status: Option<u16> },
    /// The Chat API answered `ok: false`.
    UpstreamRejected { detail: Value },
    /// Internal fault after decoding.
    Failed,
}

/// Webhook relay: decode → gate → forward → reply.
///
/// Holds no per-request state; one instance serves every invocation.
pub struct Relay {
    home: HomeClient,
    telegram: TelegramSender,
    fallback_token: Option<String>,
    typing_delay: Duration,
}

impl Relay {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let api_url = reqwest::Url::parse(&config.telegram.api_url)
            .with_context(|| format!("Invalid telegram.api_url: {}", config.telegram.api_url))?;

        Ok(Self {
            home: HomeClient::new(client.clone(), &config.home.base_url),
            telegram: TelegramSender::new(client, api_url),
            fallback_token: config.fallback_token().map(str::to_string),
            typing_delay: config.typing_delay(),
        })
    }

    /// Handle one webhook body.
    pub async fn handle(&self, params: WebhookParams, body: &Value) -> Outcome {
        let incoming = match Update::from_json(body) {
            Some(update) => {
                debug!("Decoded {} update", update.kind.name());
                match update.normalize() {
                    Some(incoming) => incoming,
                    None => {
                        debug!("Update has no chat to reply to");
                        return Outcome::Ignored;
                    }
                }
            }
            None => {
                debug!("No actionable message in update");
                return Outcome::Ignored;
            }
        };

        let token = match non_empty(params.token).or_else(|| self.fallback_token.clone()) {
            Some(token) => token,
            None => {
                warn!("No bot token provided to webhook; skipping reply");
                return Outcome::MissingToken;
            }
        };
        let site_id = non_empty(params.site_id).or_else(|| body_site_id(body));

        let bot = self.telegram.bot(&token);
        match self
            .process(&bot, &incoming, site_id.as_deref(), body)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error relaying message: {:#}", e);
                bot.send_reply(incoming.chat_id, SERVER_ERROR_MESSAGE, incoming.message_id)
                    .await
                    .log_failure("sendMessage");
                Outcome::Failed
            }
        }
    }

    async fn process(
        &self,
        bot: &TelegramBot,
        incoming: &IncomingMessage,
        site_id: Option<&str>,
        body: &Value,
    ) -> Result<Outcome> {
        let chat_id = incoming.chat_id;
        let reply_to = incoming.message_id;

        if let Some(site_id) = site_id {
            match self.home.site_config(site_id).await {
                Ok(cfg) => {
                    debug!(
                        "Site {} config: siteOff={} botOff={} broadcast={:?}",
                        site_id,
                        cfg.site_off(),
                        cfg.bot_off(),
                        cfg.broadcast()
                    );
                    if cfg.site_off() {
                        let notice = if cfg.message().is_empty() {
                            DEFAULT_DISABLED_MESSAGE
                        } else {
                            cfg.message()
                        };
                        info!("Site {} is disabled; notifying chat {}", site_id, chat_id);
                        bot.send_reply(chat_id, &format!("⚠️ {}", notice), reply_to)
                            .await
                            .log_failure("sendMessage");
                        return Ok(Outcome::SiteDisabled);
                    }
                    if cfg.bot_off() {
                        info!("Bot for site {} is disabled; not replying", site_id);
                        return Ok(Outcome::BotDisabled);
                    }
                }
                Err(e) => {
                    warn!("Site config unavailable, continuing unrestricted: {:#}", e);
                }
            }
        }

        let payload = ForwardPayload::new(incoming, site_id, BotProfile::from_body(body));

        // Cosmetic; a failed typing indicator never stops the reply.
        bot.send_typing(chat_id).await.log_failure("sendChatAction");
        tokio::time::sleep(self.typing_delay).await;

        info!(
            "Forwarding message from {} ({:?}) in chat {}",
            incoming.from_name, incoming.from_id, chat_id
        );

        let outcome = match self.home.chat(&payload).await? {
            ChatReply::Reply(reply) => {
                let reply = reply.trim();
                let reply = if reply.is_empty() {
                    EMPTY_REPLY_FALLBACK
                } else {
                    reply
                };
                bot.send_reply(chat_id, reply, reply_to)
                    .await
                    .log_failure("sendMessage");
                Outcome::Replied
            }
            ChatReply::Rejected { error, detail } => {
                let text = error.as_deref().unwrap_or(UPSTREAM_ERROR_FALLBACK);
                bot.send_reply(chat_id, text, reply_to)
                    .await
                    .log_failure("sendMessage");
                Outcome::UpstreamRejected { detail }
            }
            ChatReply::Unavailable { status } => {
                bot.send_reply(chat_id, UNAVAILABLE_MESSAGE, reply_to)
                    .await
                    .log_failure("sendMessage");
                Outcome::UpstreamUnavailable { status }
            }
        };

        Ok(outcome)
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// `siteId` from the body, accepted as a string or a number.
fn body_site_id(body: &Value) -> Option<String> {
    match body.get("siteId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
