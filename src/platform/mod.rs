pub mod telegram;
pub mod update;

/// A message extracted from a Telegram update, normalized for forwarding
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Chat to reply into (`chat.id`, or the sender id when `chat` is absent)
    pub chat_id: i64,
    /// `text`, else `caption`, else the update's top-level `data`
    pub text: String,
    /// Original message, used as the reply target
    pub message_id: Option<i64>,
    pub from_id: Option<i64>,
    /// First and last name of the sender, trimmed
    pub from_name: String,
    /// Telegram chat type, `"private"` when unknown
    pub chat_type: String,
}
