pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use tandem_types::models::{HistoryMessage, ReplyPreview, UserProfile};

use crate::models::{NewMessage, NewShare, ReactionState, RecalledMessage, RecentConversationRow, StoredMessage};

/// Everything the gateway needs from durable storage.
///
/// Calls are blocking; the gateway runs them on the blocking pool. Atomicity
/// of each call (e.g. appending to a reaction array) is the implementor's job.
pub trait PersistenceGateway: Send + Sync {
    fn insert_message(&self, msg: NewMessage) -> Result<StoredMessage>;

    fn insert_share(&self, share: NewShare) -> Result<()>;

    /// Appends `emoji` to the message's reaction array. `None` when the
    /// message does not exist.
    fn append_reaction(&self, message_id: Uuid, emoji: &str) -> Result<Option<ReactionState>>;

    /// Marks the message recalled if `requester_id` is its sender. `None`
    /// when the message is missing or owned by someone else.
    fn set_recalled(&self, message_id: Uuid, requester_id: Uuid) -> Result<Option<RecalledMessage>>;

    /// Idempotent. Returns whether a new tombstone was written.
    fn insert_deletion_tombstone(&self, message_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// One page of conversation history older than `before`, excluding rows
    /// the requester deleted, in ascending creation order.
    fn query_history(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
        requester_id: Uuid,
    ) -> Result<Vec<HistoryMessage>>;

    /// Legacy direct history: messages the user sent, received, or that were
    /// broadcast to everyone. Same ordering and tombstone rules.
    fn query_direct_history(
        &self,
        user_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<HistoryMessage>>;

    /// Conversation ids the user belongs to.
    fn query_membership(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    fn query_recent_contacts(&self, user_id: Uuid) -> Result<Vec<RecentConversationRow>>;

    fn query_user_by_id(&self, id: Uuid) -> Result<Option<UserProfile>>;

    fn query_reply_preview(&self, message_id: Uuid) -> Result<Option<ReplyPreview>>;

    /// Whether a refresh token with this SHA-256 hex digest was issued and is
    /// neither revoked nor expired.
    fn refresh_token_active(&self, token_hash: &str) -> Result<bool>;
}

pub struct Database {
    conn: Mutex<Connection>,
    /// Last creation timestamp handed out; keeps message timestamps strictly
    /// increasing so cursor pagination never splits a tie.
    clock: Mutex<DateTime<Utc>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self::from_conn(conn))
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self::from_conn(conn))
    }

    fn from_conn(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Current time at microsecond precision, bumped past the previous value
    /// when the wall clock has not advanced.
    pub(crate) fn next_timestamp(&self) -> Result<DateTime<Utc>> {
        let mut last = self.clock.lock().map_err(|e| anyhow::anyhow!("clock lock poisoned: {}", e))?;
        let mut now = Utc::now().trunc_subsecs(6);
        if now <= *last {
            now = *last + chrono::Duration::microseconds(1);
        }
        *last = now;
        Ok(now)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}
