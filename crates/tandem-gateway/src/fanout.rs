//! Delivery to live sessions.
//!
//! Delivery is at-most-once per open session: offline members are skipped and
//! nothing is queued for them. Senders are used while the registry read lock
//! is held and never cloned out, so a session that unregisters stops
//! receiving immediately.

use tracing::{debug, error};
use uuid::Uuid;

use tandem_db::models::RecentConversationRow;
use tandem_types::events::OutboundFrame;
use tandem_types::models::{ConversationKind, RecentContact};

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::registry::{Registry, send_all};

impl Gateway {
    /// Every online session of every known member of the conversation.
    pub async fn deliver_to_conversation(&self, conversation_id: Uuid, frame: OutboundFrame) -> usize {
        self.deliver_to_members(conversation_id, None, frame).await
    }

    /// Same as [`Gateway::deliver_to_conversation`] but skips all sessions
    /// of `except`.
    pub async fn deliver_to_others(&self, conversation_id: Uuid, except: Uuid, frame: OutboundFrame) -> usize {
        self.deliver_to_members(conversation_id, Some(except), frame).await
    }

    async fn deliver_to_members(&self, conversation_id: Uuid, except: Option<Uuid>, frame: OutboundFrame) -> usize {
        let members = self.members_of(conversation_id).await;
        let registry = self.inner.registry.read().await;

        let delivered: usize = members
            .iter()
            .filter(|&&id| Some(id) != except)
            .map(|&id| send_all(registry.sessions_of(id), &frame))
            .sum();

        debug!(
            "{} -> conversation {}: {} session(s)",
            frame.kind(),
            conversation_id,
            delivered
        );
        delivered
    }

    /// Every online session of one user.
    pub async fn deliver_to_user(&self, user_id: Uuid, frame: OutboundFrame) -> usize {
        let registry = self.inner.registry.read().await;
        send_all(registry.sessions_of(user_id), &frame)
    }

    /// Every authenticated session.
    pub async fn broadcast_all(&self, frame: OutboundFrame) -> usize {
        let registry = self.inner.registry.read().await;
        send_all(registry.all_sessions(), &frame)
    }

    /// Sends the full online-user list to every authenticated session.
    /// Cost grows with the total session count; run on every connect and
    /// disconnect.
    pub(crate) async fn broadcast_presence(&self) {
        let registry = self.inner.registry.read().await;
        let frame = OutboundFrame::Conversions {
            users: registry.online_users(),
        };
        send_all(registry.all_sessions(), &frame);
    }

    /// Builds the user's recent-contacts view with live online flags.
    pub(crate) async fn recent_contacts(&self, user_id: Uuid) -> Result<Vec<RecentContact>, GatewayError> {
        let rows = self
            .with_store(move |store| store.query_recent_contacts(user_id))
            .await?;

        let registry = self.inner.registry.read().await;
        Ok(rows.into_iter().map(|row| to_contact(row, &registry)).collect())
    }

    /// Pushes a fresh recent-contacts view to all of the user's sessions.
    /// Failures are logged; the operation that triggered the refresh has
    /// already succeeded.
    pub(crate) async fn refresh_recent_contacts(&self, user_id: Uuid) {
        if !self.is_online(user_id).await {
            return;
        }

        match self.recent_contacts(user_id).await {
            Ok(conversations) => {
                self.deliver_to_user(user_id, OutboundFrame::RecentContacts { conversations })
                    .await;
            }
            Err(e) => error!("Failed to load recent contacts for {}: {}", user_id, e),
        }
    }

    pub(crate) async fn refresh_recent_contacts_for(&self, conversation_id: Uuid) {
        for member in self.members_of(conversation_id).await {
            self.refresh_recent_contacts(member).await;
        }
    }
}

fn to_contact(row: RecentConversationRow, registry: &Registry) -> RecentContact {
    let last_message_preview = row.last_message_preview.unwrap_or_default();

    if row.kind == "group" {
        RecentContact {
            conversation_id: row.conversation_id,
            kind: ConversationKind::Group,
            title: row.group_name,
            avatar: row.group_avatar,
            user_id: None,
            last_message_at: row.last_message_at,
            last_message_preview,
            online: false,
        }
    } else {
        RecentContact {
            conversation_id: row.conversation_id,
            kind: ConversationKind::Direct,
            title: row.other_user_name,
            avatar: row.other_user_avatar,
            user_id: row.other_user_id,
            last_message_at: row.last_message_at,
            last_message_preview,
            online: row.other_user_id.is_some_and(|id| registry.is_online(id)),
        }
    }
}
