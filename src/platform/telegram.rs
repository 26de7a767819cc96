use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{ChatAction, ChatId, MessageId, ParseMode, ReplyParameters};
use teloxide::{Bot, RequestError};
use tracing::{debug, warn};

/// Telegram rejects messages longer than 4096 characters
const MAX_MESSAGE_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Outcome of a Telegram call.
///
/// Delivery is fire-and-forget: the caller logs a failure and moves on.
/// Nothing is retried and nothing propagates.
#[must_use]
#[derive(Debug)]
pub enum Delivery {
    Sent,
    Failed(RequestError),
}

impl Delivery {
    fn from_result<T>(result: Result<T, RequestError>) -> Self {
        match result {
            Ok(_) => Delivery::Sent,
            Err(e) => Delivery::Failed(e),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }

    /// Log a failed delivery under `what`.
    pub fn log_failure(self, what: &str) {
        if let Delivery::Failed(e) = self {
            warn!("Telegram {} failed: {}", what, e);
        }
    }
}

/// Builds per-token Telegram clients that share one HTTP client.
#[derive(Clone)]
pub struct TelegramSender {
    client: reqwest::Client,
    api_url: reqwest::Url,
}

impl TelegramSender {
    pub fn new(client: reqwest::Client, api_url: reqwest::Url) -> Self {
        Self { client, api_url }
    }

    /// A client for one bot token, built per request.
    pub fn bot(&self, token: &str) -> TelegramBot {
        let bot = Bot::with_client(token, self.client.clone()).set_api_url(self.api_url.clone());
        TelegramBot { bot }
    }
}

pub struct TelegramBot {
    bot: Bot,
}

impl TelegramBot {
    /// Show the "typing…" indicator in `chat_id`.
    pub async fn send_typing(&self, chat_id: i64) -> Delivery {
        debug!("sendChatAction typing to chat_id={}", chat_id);
        Delivery::from_result(
            self.bot
                .send_chat_action(ChatId(chat_id), ChatAction::Typing)
                .await,
        )
    }

    /// Send `text` with legacy Markdown formatting, as a reply to `reply_to`
    /// when given. Long text is split; only the first part quotes the
    /// original message.
    #[allow(deprecated)]
    pub async fn send_reply(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Delivery {
        let mut reply_to = reply_to.and_then(|id| i32::try_from(id).ok()).map(MessageId);

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            debug!("sendMessage to chat_id={}", chat_id);
            let mut request = self
                .bot
                .send_message(ChatId(chat_id), chunk)
                .parse_mode(ParseMode::Markdown);
            if let Some(id) = reply_to.take() {
                request = request.reply_parameters(ReplyParameters::new(id));
            }
            let delivery = Delivery::from_result(request.await);
            if !delivery.is_sent() {
                return delivery;
            }
        }

        Delivery::Sent
    }
}
