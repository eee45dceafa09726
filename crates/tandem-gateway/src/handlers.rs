use futures_util::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tandem_db::models::{NewMessage, NewShare, StoredMessage};
use tandem_types::events::{ChatPayload, HistoryCursor, InboundFrame, OutboundFrame, SharedMessage};
use tandem_types::models::{ReplyPreview, UserProfile};

use crate::Flow;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::session::Session;

/// History page size for a conversation.
const CONVERSATION_PAGE: u32 = 10;
/// History page size for legacy direct messages.
const DIRECT_PAGE: u32 = 50;

const BROADCAST_TARGET: &str = "all";
const SHARE_MESSAGE_TYPE: &str = "share";

/// Builds the `chat` envelope for a stored conversation message. `kind`
/// overrides the stored type on the wire.
pub(crate) fn chat_envelope(
    stored: StoredMessage,
    conversation_id: Uuid,
    kind: Option<&str>,
    reply_to: Option<ReplyPreview>,
) -> OutboundFrame {
    OutboundFrame::Chat {
        payload: ChatPayload {
            id: stored.id,
            kind: kind.map_or(stored.kind, str::to_string),
            from: stored.sender_id,
            conversation_id,
            message: stored.content,
            created_at: stored.created_at,
            reply_to,
        },
    }
}

impl Gateway {
    /// Entry point for every text frame. Malformed input is logged and
    /// dropped; the connection survives it.
    pub async fn handle_text(&self, session: &mut Session, text: &str) -> Flow {
        match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) => self.handle_frame(session, frame).await,
            Err(e) => {
                // The raw text may hold a bearer token, so it is not logged.
                warn!("Session {} sent a bad frame ({} bytes): {}", session.id(), text.len(), e);
                Flow::Continue
            }
        }
    }

    pub async fn handle_frame(&self, session: &mut Session, frame: InboundFrame) -> Flow {
        let frame = match frame {
            InboundFrame::Auth { token } => {
                if session.is_authenticated() {
                    debug!("Ignoring auth on authenticated session {}", session.id());
                    return Flow::Continue;
                }
                return self.authenticate_with_token(session, token).await;
            }
            other => other,
        };

        let Some(user) = session.user().cloned() else {
            warn!("{} before authentication on session {}", frame.kind(), session.id());
            session.send(OutboundFrame::Error {
                message: "Unauthorized".to_string(),
            });
            return Flow::Continue;
        };

        let kind = frame.kind();
        let result = match frame {
            InboundFrame::Auth { .. } => Ok(()),
            InboundFrame::Chat {
                conversation_id,
                to,
                message,
                msg_type,
                reply_to,
            } => match (conversation_id, to) {
                (Some(conversation_id), _) => {
                    self.post_to_conversation(&user, conversation_id, message, msg_type, reply_to)
                        .await
                }
                (None, Some(to)) => self.post_direct(&user, to, message, msg_type).await,
                (None, None) => {
                    warn!("Chat from {} has neither conversationId nor to", user.id);
                    Ok(())
                }
            },
            InboundFrame::MessageShare {
                from_conversation_id,
                target_conversation_ids,
                note,
                messages,
            } => {
                self.share(&user, from_conversation_id, target_conversation_ids, note, messages)
                    .await;
                Ok(())
            }
            InboundFrame::Reaction { message_id, reaction } => self.react(&user, message_id, reaction).await,
            InboundFrame::LoadMessages {
                conversation_id,
                first_msg,
            } => self.load_messages(session, &user, conversation_id, first_msg).await,
            InboundFrame::Recall { message_id } => self.recall(session, &user, message_id).await,
            InboundFrame::Delete { message_id } => self.delete_for_self(&user, message_id).await,
            InboundFrame::JoinCall { conversation_id } => self.join_call(&user, conversation_id).await,
            InboundFrame::CallSignal { conversation_id, data } => {
                self.relay_signal(&user, conversation_id, data).await
            }
            InboundFrame::CallInvite {
                conversation_id,
                call_type,
            } => self.invite(&user, conversation_id, call_type).await,
            InboundFrame::CallAccept { conversation_id } => self.accept(&user, conversation_id).await,
            InboundFrame::CallEnd {
                conversation_id,
                message,
            } => {
                let reason = message.and_then(|note| note.reason);
                self.end_call(&user, conversation_id, reason).await
            }
        };

        if let Err(e) = result {
            error!("{} from {} ({}) failed: {}", kind, user.name, user.id, e);
        }
        Flow::Continue
    }

    /// Persist, compose with the reply preview, fan out, then refresh every
    /// member's recent contacts.
    async fn post_to_conversation(
        &self,
        user: &UserProfile,
        conversation_id: Uuid,
        message: String,
        msg_type: String,
        reply_to: Option<Uuid>,
    ) -> Result<(), GatewayError> {
        let new = NewMessage {
            reply_to,
            ..NewMessage::in_conversation(user.id, conversation_id, message, msg_type)
        };
        let stored = self.with_store(move |store| store.insert_message(new)).await?;

        // The row is already stored, so a failed preview lookup must not
        // stop delivery.
        let preview = match stored.reply_to {
            Some(id) => match self.with_store(move |store| store.query_reply_preview(id)).await {
                Ok(preview) => preview,
                Err(e) => {
                    error!("Reply preview for {} failed, delivering without it: {}", stored.id, e);
                    None
                }
            },
            None => None,
        };

        self.deliver_to_conversation(conversation_id, chat_envelope(stored, conversation_id, None, preview))
            .await;
        self.refresh_recent_contacts_for(conversation_id).await;
        Ok(())
    }

    /// Legacy addressing: `to` is a user id or "all".
    async fn post_direct(
        &self,
        user: &UserProfile,
        to: String,
        message: String,
        msg_type: String,
    ) -> Result<(), GatewayError> {
        let receiver_id = if to == BROADCAST_TARGET {
            None
        } else {
            match to.parse::<Uuid>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Chat from {} addressed to unknown target '{}'", user.id, to);
                    return Ok(());
                }
            }
        };

        let new = NewMessage {
            sender_id: user.id,
            conversation_id: None,
            receiver_id,
            content: message.clone(),
            kind: msg_type,
            reply_to: None,
            shared_from: None,
        };
        self.with_store(move |store| store.insert_message(new)).await?;

        let frame = OutboundFrame::DirectChat {
            from: user.name.clone(),
            to,
            message,
        };

        match receiver_id {
            None => {
                self.broadcast_all(frame).await;
            }
            Some(receiver_id) => {
                self.deliver_to_user(receiver_id, frame.clone()).await;
                if receiver_id != user.id {
                    self.deliver_to_user(user.id, frame).await;
                }
            }
        }
        Ok(())
    }

    /// Every (target, message) pair is independent; a failed pair is logged
    /// and does not stop the others.
    async fn share(
        &self,
        user: &UserProfile,
        from_conversation_id: Option<Uuid>,
        targets: Vec<Uuid>,
        note: String,
        messages: Vec<SharedMessage>,
    ) {
        let pairs = targets
            .iter()
            .flat_map(|&target| messages.iter().map(move |source| (target, source.clone())));

        let results = join_all(
            pairs.map(|(target, source)| self.share_one(user, from_conversation_id, target, source, note.clone())),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        for e in results.into_iter().filter_map(Result::err) {
            error!("Share from {} failed: {}", user.id, e);
        }
        info!(
            "{} ({}) shared {} message(s) into {} conversation(s), {} failed",
            user.name,
            user.id,
            messages.len(),
            targets.len(),
            failed
        );
    }

    async fn share_one(
        &self,
        user: &UserProfile,
        from_conversation_id: Option<Uuid>,
        target: Uuid,
        source: SharedMessage,
        note: String,
    ) -> Result<(), GatewayError> {
        let record = NewShare {
            sender_id: user.id,
            from_conversation_id,
            to_conversation_id: target,
            message: source.message.clone(),
            note,
        };
        self.with_store(move |store| store.insert_share(record)).await?;

        let copy = NewMessage {
            shared_from: from_conversation_id,
            ..NewMessage::in_conversation(user.id, target, source.message, source.kind)
        };
        let stored = self.with_store(move |store| store.insert_message(copy)).await?;

        self.deliver_to_conversation(target, chat_envelope(stored, target, Some(SHARE_MESSAGE_TYPE), None))
            .await;
        self.refresh_recent_contacts_for(target).await;
        Ok(())
    }

    async fn react(&self, user: &UserProfile, message_id: Uuid, reaction: String) -> Result<(), GatewayError> {
        let state = self
            .with_store(move |store| store.append_reaction(message_id, &reaction))
            .await?;

        let Some(state) = state else {
            warn!("Reaction from {} on unknown message {}", user.id, message_id);
            return Ok(());
        };

        let frame = OutboundFrame::ReactionUpdate {
            message_id,
            conversation_id: state.conversation_id,
            reactions: state.reactions,
        };
        match state.conversation_id {
            Some(conversation_id) => self.deliver_to_conversation(conversation_id, frame).await,
            None => self.deliver_to_user(user.id, frame).await,
        };
        Ok(())
    }

    /// Replies to the requesting session only.
    async fn load_messages(
        &self,
        session: &Session,
        user: &UserProfile,
        conversation_id: Option<Uuid>,
        cursor: Option<HistoryCursor>,
    ) -> Result<(), GatewayError> {
        let before = cursor.and_then(|c| c.created_at);
        let user_id = user.id;

        let rows = match conversation_id {
            Some(conversation_id) => {
                self.with_store(move |store| store.query_history(conversation_id, before, CONVERSATION_PAGE, user_id))
                    .await?
            }
            None => {
                self.with_store(move |store| store.query_direct_history(user_id, before, DIRECT_PAGE))
                    .await?
            }
        };

        debug!("Loaded {} message(s) for {}", rows.len(), user_id);
        session.send(OutboundFrame::Messages { conversation_id, rows });
        Ok(())
    }

    async fn recall(&self, session: &Session, user: &UserProfile, message_id: Uuid) -> Result<(), GatewayError> {
        let user_id = user.id;
        let recalled = self
            .with_store(move |store| store.set_recalled(message_id, user_id))
            .await?;

        let Some(recalled) = recalled else {
            warn!("{} ({}) may not recall message {}", user.name, user.id, message_id);
            session.send(OutboundFrame::Error {
                message: "Message not found or you are not the sender".to_string(),
            });
            return Ok(());
        };

        let frame = OutboundFrame::MessageRecalled { message_id };
        match recalled.conversation_id {
            Some(conversation_id) => {
                self.deliver_to_conversation(conversation_id, frame).await;
                self.refresh_recent_contacts_for(conversation_id).await;
            }
            None => {
                self.deliver_to_user(user.id, frame).await;
            }
        }
        Ok(())
    }

    /// Hides the message for the requester only; other members are not told.
    async fn delete_for_self(&self, user: &UserProfile, message_id: Uuid) -> Result<(), GatewayError> {
        let user_id = user.id;
        let created = self
            .with_store(move |store| store.insert_deletion_tombstone(message_id, user_id))
            .await?;
        if !created {
            debug!("Message {} was already deleted for {}", message_id, user_id);
        }

        self.deliver_to_user(user_id, OutboundFrame::MessageDeletedSelf { message_id })
            .await;
        self.refresh_recent_contacts(user_id).await;
        Ok(())
    }
}
