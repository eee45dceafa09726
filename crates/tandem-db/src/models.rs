//! Row and parameter types for the store. Ids travel as `Uuid` at the trait
//! boundary and as TEXT inside SQLite.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

/// Fixed-width UTC timestamp format; text order equals time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub fn parse_uuid(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", raw, e);
        Uuid::nil()
    })
}

pub fn parse_reactions(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Corrupt reactions array '{}': {}", raw, e);
        Vec::new()
    })
}

/// A message to persist. Id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub content: String,
    pub kind: String,
    pub reply_to: Option<Uuid>,
    pub shared_from: Option<Uuid>,
}

impl NewMessage {
    pub fn in_conversation(sender_id: Uuid, conversation_id: Uuid, content: String, kind: String) -> Self {
        Self {
            sender_id,
            conversation_id: Some(conversation_id),
            receiver_id: None,
            content,
            kind,
            reply_to: None,
            shared_from: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub content: String,
    pub kind: String,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Audit record of a forwarded message.
#[derive(Debug, Clone)]
pub struct NewShare {
    pub sender_id: Uuid,
    pub from_conversation_id: Option<Uuid>,
    pub to_conversation_id: Uuid,
    pub message: String,
    pub note: String,
}

/// Reaction array after an append.
#[derive(Debug, Clone)]
pub struct ReactionState {
    pub conversation_id: Option<Uuid>,
    pub reactions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecalledMessage {
    pub conversation_id: Option<Uuid>,
}

pub struct RecentConversationRow {
    pub conversation_id: Uuid,
    pub kind: String,
    pub group_name: Option<String>,
    pub group_avatar: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub other_user_id: Option<Uuid>,
    pub other_user_name: Option<String>,
    pub other_user_avatar: Option<String>,
}
