use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cached projection of a user, fetched once at authentication and attached
/// to every session the user opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Normal,
    Recalled,
}

impl MessageStatus {
    pub fn from_code(code: i64) -> Self {
        if code == 1 { Self::Recalled } else { Self::Normal }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Recalled => 1,
        }
    }
}

/// Truncated view of the message a reply points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One row of a `messages` history page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: Uuid,
    pub from: Uuid,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<Uuid>,
    #[serde(rename = "receiverId", skip_serializing_if = "Option::is_none", default)]
    pub receiver_id: Option<Uuid>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub reactions: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: MessageStatus,
    pub reply_to: Option<ReplyPreview>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Entry of the `recent_contacts` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentContact {
    pub conversation_id: Uuid,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub avatar: Option<String>,
    /// The other member of a direct conversation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: String,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ended,
    Missed,
}

/// Content of a `call`-type message, stored as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_type: String,
    pub status: CallStatus,
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl CallSummary {
    /// A zero-length call counts as missed even when it was accepted.
    pub fn finished(call_type: String, duration: u64, message: Option<String>) -> Self {
        let status = if duration > 0 { CallStatus::Ended } else { CallStatus::Missed };
        Self { call_type, status, duration, message }
    }

    pub fn missed(call_type: String) -> Self {
        Self { call_type, status: CallStatus::Missed, duration: 0, message: None }
    }
}
