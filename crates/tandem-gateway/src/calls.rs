use std::collections::HashMap;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Active { started_at: Instant },
}

/// At most one call per conversation.
#[derive(Debug)]
pub struct CallSession {
    /// Distinguishes successive calls in the same conversation so a stale
    /// ring timer cannot expire a newer call.
    pub call_id: Uuid,
    pub caller_id: Uuid,
    pub call_type: String,
    pub state: CallState,
    timer: Option<AbortHandle>,
}

impl CallSession {
    pub fn ringing(call_id: Uuid, caller_id: Uuid, call_type: String, timer: AbortHandle) -> Self {
        Self {
            call_id,
            caller_id,
            call_type,
            state: CallState::Ringing,
            timer: Some(timer),
        }
    }

    /// Whole seconds since the call was accepted; zero if it never was.
    pub fn duration_secs(&self) -> u64 {
        match self.state {
            CallState::Active { started_at } => started_at.elapsed().as_secs(),
            CallState::Ringing => 0,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Outcome of accepting a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub call_type: String,
    /// False when the call was already active; the relay is repeated but the
    /// start time is kept.
    pub first: bool,
}

#[derive(Default)]
pub struct CallTable {
    calls: HashMap<Uuid, CallSession>,
}

impl CallTable {
    pub fn contains(&self, conversation_id: Uuid) -> bool {
        self.calls.contains_key(&conversation_id)
    }

    pub fn get(&self, conversation_id: Uuid) -> Option<&CallSession> {
        self.calls.get(&conversation_id)
    }

    /// Starts ringing. Returns false, leaving the table untouched, when the
    /// conversation already has a call.
    pub fn insert(&mut self, conversation_id: Uuid, session: CallSession) -> bool {
        if self.calls.contains_key(&conversation_id) {
            return false;
        }
        self.calls.insert(conversation_id, session);
        true
    }

    pub fn accept(&mut self, conversation_id: Uuid) -> Option<Accepted> {
        let session = self.calls.get_mut(&conversation_id)?;
        let first = match session.state {
            CallState::Ringing => {
                session.cancel_timer();
                session.state = CallState::Active { started_at: Instant::now() };
                true
            }
            CallState::Active { .. } => false,
        };
        Some(Accepted {
            call_type: session.call_type.clone(),
            first,
        })
    }

    /// Removes the call if it is still the same call and still ringing. The
    /// ring timer calls this; anything else means it lost the race.
    pub fn expire(&mut self, conversation_id: Uuid, call_id: Uuid) -> Option<CallSession> {
        match self.calls.get(&conversation_id) {
            Some(s) if s.call_id == call_id && s.state == CallState::Ringing => {
                self.calls.remove(&conversation_id)
            }
            _ => None,
        }
    }

    pub fn end(&mut self, conversation_id: Uuid) -> Option<CallSession> {
        let mut session = self.calls.remove(&conversation_id)?;
        session.cancel_timer();
        Some(session)
    }
}
