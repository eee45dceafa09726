use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{HistoryMessage, RecentContact, ReplyPreview, UserProfile};

fn default_msg_type() -> String {
    "text".to_string()
}

fn default_call_type() -> String {
    "video".to_string()
}

/// Frames sent FROM client TO server. Dispatch is on the `type` tag; field
/// names follow the camelCase the web client already speaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Authenticate the connection with a bearer token
    Auth { token: Option<String> },

    /// Post a message. Without `conversationId` this is a legacy direct
    /// message addressed by `to` (a user id, or "all").
    #[serde(rename_all = "camelCase")]
    Chat {
        conversation_id: Option<Uuid>,
        to: Option<String>,
        message: String,
        #[serde(default = "default_msg_type")]
        msg_type: String,
        reply_to: Option<Uuid>,
    },

    /// Forward messages into one or more conversations
    #[serde(rename_all = "camelCase")]
    MessageShare {
        from_conversation_id: Option<Uuid>,
        target_conversation_ids: Vec<Uuid>,
        #[serde(default)]
        note: String,
        messages: Vec<SharedMessage>,
    },

    #[serde(rename_all = "camelCase")]
    Reaction { message_id: Uuid, reaction: String },

    /// Fetch the page of history older than `firstMsg.created_at`
    #[serde(rename_all = "camelCase")]
    LoadMessages {
        conversation_id: Option<Uuid>,
        first_msg: Option<HistoryCursor>,
    },

    #[serde(rename_all = "camelCase")]
    Recall { message_id: Uuid },

    /// Hide a message from the requester's own history
    #[serde(rename_all = "camelCase")]
    Delete { message_id: Uuid },

    #[serde(rename_all = "camelCase")]
    JoinCall { conversation_id: Uuid },

    /// Opaque SDP/ICE payload relayed to the other members
    #[serde(rename_all = "camelCase")]
    CallSignal {
        conversation_id: Uuid,
        #[serde(default)]
        data: Value,
    },

    #[serde(rename_all = "camelCase")]
    CallInvite {
        conversation_id: Uuid,
        #[serde(default = "default_call_type")]
        call_type: String,
    },

    #[serde(rename_all = "camelCase")]
    CallAccept { conversation_id: Uuid },

    #[serde(rename_all = "camelCase")]
    CallEnd {
        conversation_id: Uuid,
        message: Option<CallEndNote>,
    },
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Chat { .. } => "chat",
            Self::MessageShare { .. } => "message_share",
            Self::Reaction { .. } => "reaction",
            Self::LoadMessages { .. } => "load_messages",
            Self::Recall { .. } => "recall",
            Self::Delete { .. } => "delete",
            Self::JoinCall { .. } => "join_call",
            Self::CallSignal { .. } => "call_signal",
            Self::CallInvite { .. } => "call_invite",
            Self::CallAccept { .. } => "call_accept",
            Self::CallEnd { .. } => "call_end",
        }
    }
}

/// One source message inside a `message_share` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedMessage {
    pub message: String,
    #[serde(rename = "type", default = "default_msg_type")]
    pub kind: String,
}

/// Pagination cursor: the oldest message the client already holds. Without
/// a timestamp the newest page is served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryCursor {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallEndNote {
    pub reason: Option<String>,
}

/// Body of a conversation-scoped `chat` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub from: Uuid,
    #[serde(rename = "conversationId")]
    pub conversation_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub reply_to: Option<ReplyPreview>,
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Authentication succeeded
    Welcome { user: UserProfile, message: String },

    /// Authentication failed; the connection is closed right after
    AuthError { message: String },

    /// Request rejected; the connection stays open
    Error { message: String },

    /// A history page in ascending chronological order
    #[serde(rename_all = "camelCase")]
    Messages {
        conversation_id: Option<Uuid>,
        rows: Vec<HistoryMessage>,
    },

    RecentContacts { conversations: Vec<RecentContact> },

    /// Full list of online users, rebroadcast on every connect/disconnect
    Conversions { users: Vec<UserProfile> },

    Chat { payload: ChatPayload },

    /// Legacy direct/broadcast chat envelope
    #[serde(rename = "chat")]
    DirectChat {
        from: String,
        to: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    ReactionUpdate {
        message_id: Uuid,
        conversation_id: Option<Uuid>,
        reactions: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    MessageRecalled { message_id: Uuid },

    #[serde(rename_all = "camelCase")]
    MessageDeletedSelf { message_id: Uuid },

    #[serde(rename_all = "camelCase")]
    CallPeerJoined { conversation_id: Uuid, from: Uuid },

    #[serde(rename_all = "camelCase")]
    CallSignal {
        conversation_id: Uuid,
        from: Uuid,
        data: Value,
    },

    #[serde(rename_all = "camelCase")]
    CallInvite {
        conversation_id: Uuid,
        from: Uuid,
        call_type: String,
        from_name: String,
    },

    #[serde(rename_all = "camelCase")]
    CallAccept {
        conversation_id: Uuid,
        from: Uuid,
        call_type: String,
    },

    #[serde(rename_all = "camelCase")]
    CallEnd {
        conversation_id: Uuid,
        from: Uuid,
        call_type: String,
    },
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::AuthError { .. } => "auth_error",
            Self::Error { .. } => "error",
            Self::Messages { .. } => "messages",
            Self::RecentContacts { .. } => "recent_contacts",
            Self::Conversions { .. } => "conversions",
            Self::Chat { .. } | Self::DirectChat { .. } => "chat",
            Self::ReactionUpdate { .. } => "reaction_update",
            Self::MessageRecalled { .. } => "message_recalled",
            Self::MessageDeletedSelf { .. } => "message_deleted_self",
            Self::CallPeerJoined { .. } => "call_peer_joined",
            Self::CallSignal { .. } => "call_signal",
            Self::CallInvite { .. } => "call_invite",
            Self::CallAccept { .. } => "call_accept",
            Self::CallEnd { .. } => "call_end",
        }
    }
}
