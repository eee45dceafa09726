//! Call signaling: one call per conversation, Idle -> Ringing -> Active -> Idle.
//!
//! The call table is the only synchronization point. A ringing call carries
//! a timer task; whichever of the timer and `call_accept` reaches the table
//! first decides the outcome, and the loser finds nothing to act on.

use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tandem_db::models::NewMessage;
use tandem_types::events::OutboundFrame;
use tandem_types::models::{CallSummary, UserProfile};

use crate::calls::CallSession;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::handlers::chat_envelope;

const CALL_MESSAGE_TYPE: &str = "call";

impl Gateway {
    async fn knows_conversation(&self, conversation_id: Uuid) -> bool {
        self.inner.membership.read().await.contains(conversation_id)
    }

    pub(crate) async fn join_call(&self, user: &UserProfile, conversation_id: Uuid) -> Result<(), GatewayError> {
        if !self.knows_conversation(conversation_id).await {
            warn!("{} joined a call in unknown conversation {}", user.id, conversation_id);
            return Ok(());
        }

        self.deliver_to_others(
            conversation_id,
            user.id,
            OutboundFrame::CallPeerJoined {
                conversation_id,
                from: user.id,
            },
        )
        .await;
        Ok(())
    }

    /// Relays SDP/ICE payloads verbatim. Needs no call session.
    pub(crate) async fn relay_signal(
        &self,
        user: &UserProfile,
        conversation_id: Uuid,
        data: Value,
    ) -> Result<(), GatewayError> {
        if !self.knows_conversation(conversation_id).await {
            warn!("{} signaled unknown conversation {}", user.id, conversation_id);
            return Ok(());
        }

        self.deliver_to_others(
            conversation_id,
            user.id,
            OutboundFrame::CallSignal {
                conversation_id,
                from: user.id,
                data,
            },
        )
        .await;
        Ok(())
    }

    /// First invite wins; later ones are dropped until the call is over.
    pub(crate) async fn invite(
        &self,
        user: &UserProfile,
        conversation_id: Uuid,
        call_type: String,
    ) -> Result<(), GatewayError> {
        if !self.knows_conversation(conversation_id).await {
            warn!("{} invited to a call in unknown conversation {}", user.id, conversation_id);
            return Ok(());
        }

        {
            let mut calls = self.inner.calls.lock().await;
            if calls.contains(conversation_id) {
                debug!("Call already in progress in {}, ignoring invite from {}", conversation_id, user.id);
                return Ok(());
            }

            // The timer needs the table lock before it can act, so it cannot
            // observe the table before the session is inserted.
            let call_id = Uuid::new_v4();
            let timer = tokio::spawn(self.clone().expire_unanswered(conversation_id, call_id));
            calls.insert(
                conversation_id,
                CallSession::ringing(call_id, user.id, call_type.clone(), timer.abort_handle()),
            );
        }

        info!("{} ({}) started a {} call in {}", user.name, user.id, call_type, conversation_id);

        self.deliver_to_others(
            conversation_id,
            user.id,
            OutboundFrame::CallInvite {
                conversation_id,
                from: user.id,
                call_type,
                from_name: user.name.clone(),
            },
        )
        .await;
        Ok(())
    }

    pub(crate) async fn accept(&self, user: &UserProfile, conversation_id: Uuid) -> Result<(), GatewayError> {
        let accepted = self.inner.calls.lock().await.accept(conversation_id);
        let Some(accepted) = accepted else {
            debug!("{} accepted a call that no longer exists in {}", user.id, conversation_id);
            return Ok(());
        };

        if accepted.first {
            info!("{} ({}) accepted the call in {}", user.name, user.id, conversation_id);
        }

        self.deliver_to_others(
            conversation_id,
            user.id,
            OutboundFrame::CallAccept {
                conversation_id,
                from: user.id,
                call_type: accepted.call_type,
            },
        )
        .await;
        Ok(())
    }

    /// Records the summary, then relays the end even if recording failed.
    pub(crate) async fn end_call(
        &self,
        user: &UserProfile,
        conversation_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        let ended = self.inner.calls.lock().await.end(conversation_id);
        let Some(call) = ended else {
            debug!("{} ended a call that no longer exists in {}", user.id, conversation_id);
            return Ok(());
        };

        let duration = call.duration_secs();
        info!(
            "{} ({}) ended the call in {} after {}s",
            user.name, user.id, conversation_id, duration
        );

        let summary = CallSummary::finished(call.call_type.clone(), duration, reason);
        let recorded = self.record_call(conversation_id, call.caller_id, summary).await;

        self.deliver_to_others(
            conversation_id,
            user.id,
            OutboundFrame::CallEnd {
                conversation_id,
                from: user.id,
                call_type: call.call_type,
            },
        )
        .await;
        recorded
    }

    async fn expire_unanswered(self, conversation_id: Uuid, call_id: Uuid) {
        tokio::time::sleep(self.inner.config.call_timeout).await;

        let expired = self.inner.calls.lock().await.expire(conversation_id, call_id);
        let Some(call) = expired else {
            return;
        };

        info!("Call in {} from {} was not answered", conversation_id, call.caller_id);

        let summary = CallSummary::missed(call.call_type);
        if let Err(e) = self.record_call(conversation_id, call.caller_id, summary).await {
            error!("Failed to record missed call in {}: {}", conversation_id, e);
        }
    }

    /// Persists a call summary authored by the caller and broadcasts it to
    /// the conversation as a `call` chat message.
    async fn record_call(&self, conversation_id: Uuid, caller_id: Uuid, summary: CallSummary) -> Result<(), GatewayError> {
        let content = serde_json::to_string(&summary).map_err(anyhow::Error::from)?;
        let new = NewMessage::in_conversation(caller_id, conversation_id, content, CALL_MESSAGE_TYPE.to_string());
        let stored = self.with_store(move |store| store.insert_message(new)).await?;

        self.deliver_to_conversation(conversation_id, chat_envelope(stored, conversation_id, None, None))
            .await;
        Ok(())
    }
}
