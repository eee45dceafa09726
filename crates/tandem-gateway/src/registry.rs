use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_types::events::OutboundFrame;
use tandem_types::models::UserProfile;

pub type SessionId = Uuid;
pub type FrameSender = mpsc::UnboundedSender<OutboundFrame>;

struct UserEntry {
    user: UserProfile,
    sessions: HashMap<SessionId, FrameSender>,
}

/// Live sessions of every online user. A user is online exactly while they
/// hold at least one session here.
#[derive(Default)]
pub struct Registry {
    users: HashMap<Uuid, UserEntry>,
}

impl Registry {
    /// Adds a session for `user`. Returns how many sessions the user now has.
    pub fn register(&mut self, user: &UserProfile, session_id: SessionId, tx: FrameSender) -> usize {
        let entry = self.users.entry(user.id).or_insert_with(|| UserEntry {
            user: user.clone(),
            sessions: HashMap::new(),
        });
        // Latest profile wins
        entry.user = user.clone();
        entry.sessions.insert(session_id, tx);
        entry.sessions.len()
    }

    /// Removes one session. Returns the number of sessions the user still
    /// holds, or `None` if the session was not registered.
    pub fn unregister(&mut self, user_id: Uuid, session_id: SessionId) -> Option<usize> {
        let entry = self.users.get_mut(&user_id)?;
        entry.sessions.remove(&session_id)?;

        let remaining = entry.sessions.len();
        if remaining == 0 {
            self.users.remove(&user_id);
        }
        Some(remaining)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn sessions_of(&self, user_id: Uuid) -> impl Iterator<Item = &FrameSender> {
        self.users
            .get(&user_id)
            .into_iter()
            .flat_map(|entry| entry.sessions.values())
    }

    pub fn all_sessions(&self) -> impl Iterator<Item = &FrameSender> {
        self.users.values().flat_map(|entry| entry.sessions.values())
    }

    /// Profiles of every online user, one per user regardless of how many
    /// sessions they hold.
    pub fn online_users(&self) -> Vec<UserProfile> {
        let mut users: Vec<UserProfile> = self.users.values().map(|e| e.user.clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        users
    }

    pub fn session_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map_or(0, |e| e.sessions.len())
    }
}

/// Sends to every sender yielded, skipping closed ones. Returns how many
/// sessions accepted the frame.
pub fn send_all<'a>(senders: impl IntoIterator<Item = &'a FrameSender>, frame: &OutboundFrame) -> usize {
    senders
        .into_iter()
        .filter(|tx| tx.send(frame.clone()).is_ok())
        .count()
}
