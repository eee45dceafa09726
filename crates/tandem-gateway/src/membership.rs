use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// Conversation id -> users known to belong to it.
///
/// Populated lazily: when a user authenticates, they are added to each of
/// their own conversations. Other members appear once they connect too, so a
/// conversation's set only ever holds users who have been seen online since
/// start-up. Entries are never evicted.
#[derive(Default)]
pub struct MembershipIndex {
    members: HashMap<Uuid, HashSet<Uuid>>,
}

impl MembershipIndex {
    pub fn merge(&mut self, user_id: Uuid, conversations: impl IntoIterator<Item = Uuid>) {
        for conversation_id in conversations {
            self.members.entry(conversation_id).or_default().insert(user_id);
        }
    }

    pub fn contains(&self, conversation_id: Uuid) -> bool {
        self.members.contains_key(&conversation_id)
    }

    pub fn members_of(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.members
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
