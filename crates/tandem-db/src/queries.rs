use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use tandem_types::models::{ConversationKind, HistoryMessage, MessageStatus, ReplyPreview, UserProfile};

use crate::models::{
    NewMessage, NewShare, ReactionState, RecalledMessage, RecentConversationRow, StoredMessage,
    format_timestamp, parse_reactions, parse_timestamp, parse_uuid,
};
use crate::{Database, PersistenceGateway};

/// Columns shared by both history queries; `r` is the replied-to message.
const HISTORY_COLUMNS: &str = "
    m.id, m.sender_id, m.conversation_id, m.receiver_id, m.content, m.created_at,
    m.reactions, m.type, m.status,
    r.id, r.sender_id, substr(r.content, 1, 120), r.type";

/// Maximum number of entries in a recent-contacts list.
const RECENT_CONTACTS_LIMIT: u32 = 50;

impl PersistenceGateway for Database {
    fn insert_message(&self, msg: NewMessage) -> Result<StoredMessage> {
        let id = Uuid::now_v7();
        let created_at = self.next_timestamp()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, sender_id, conversation_id, receiver_id, content, type, reply_to_message_id, shared_from, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id.to_string(),
                    msg.sender_id.to_string(),
                    msg.conversation_id.map(|c| c.to_string()),
                    msg.receiver_id.map(|r| r.to_string()),
                    msg.content,
                    msg.kind,
                    msg.reply_to.map(|r| r.to_string()),
                    msg.shared_from.map(|s| s.to_string()),
                    format_timestamp(created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(StoredMessage {
            id,
            sender_id: msg.sender_id,
            conversation_id: msg.conversation_id,
            content: msg.content,
            kind: msg.kind,
            reply_to: msg.reply_to,
            created_at,
        })
    }

    fn insert_share(&self, share: NewShare) -> Result<()> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_shares
                    (sender_id, from_conversation_id, to_conversation_id, message, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    share.sender_id.to_string(),
                    share.from_conversation_id.map(|c| c.to_string()),
                    share.to_conversation_id.to_string(),
                    share.message,
                    share.note,
                    created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn append_reaction(&self, message_id: Uuid, emoji: &str) -> Result<Option<ReactionState>> {
        self.with_conn(|conn| {
            // Single statement, so the append is atomic with respect to other writers.
            let row: Option<(Option<String>, String)> = conn
                .query_row(
                    "UPDATE messages
                     SET reactions = json_insert(reactions, '$[#]', ?2)
                     WHERE id = ?1
                     RETURNING conversation_id, reactions",
                    rusqlite::params![message_id.to_string(), emoji],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            Ok(row.map(|(conversation_id, reactions)| ReactionState {
                conversation_id: conversation_id.as_deref().map(parse_uuid),
                reactions: parse_reactions(&reactions),
            }))
        })
    }

    fn set_recalled(&self, message_id: Uuid, requester_id: Uuid) -> Result<Option<RecalledMessage>> {
        self.with_conn(|conn| {
            let row: Option<Option<String>> = conn
                .query_row(
                    "UPDATE messages
                     SET status = ?3
                     WHERE id = ?1 AND sender_id = ?2
                     RETURNING conversation_id",
                    rusqlite::params![
                        message_id.to_string(),
                        requester_id.to_string(),
                        MessageStatus::Recalled.code(),
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(row.map(|conversation_id| RecalledMessage {
                conversation_id: conversation_id.as_deref().map(parse_uuid),
            }))
        })
    }

    fn insert_deletion_tombstone(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO message_deletions (message_id, user_id)
                 VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
                (message_id.to_string(), user_id.to_string()),
            )?;
            Ok(inserted == 1)
        })
    }

    fn query_history(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
        requester_id: Uuid,
    ) -> Result<Vec<HistoryMessage>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS}
             FROM messages m
             LEFT JOIN messages r ON r.id = m.reply_to_message_id
             WHERE m.conversation_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM message_deletions d
                   WHERE d.message_id = m.id AND d.user_id = ?2
               )
               AND (?3 IS NULL OR m.created_at < ?3)
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?4"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        conversation_id.to_string(),
                        requester_id.to_string(),
                        before.map(format_timestamp),
                        limit,
                    ],
                    history_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(oldest_first(rows))
        })
    }

    fn query_direct_history(
        &self,
        user_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<HistoryMessage>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS}
             FROM messages m
             LEFT JOIN messages r ON r.id = m.reply_to_message_id
             WHERE m.conversation_id IS NULL
               AND (m.sender_id = ?1 OR m.receiver_id = ?1 OR m.receiver_id IS NULL)
               AND NOT EXISTS (
                   SELECT 1 FROM message_deletions d
                   WHERE d.message_id = m.id AND d.user_id = ?1
               )
               AND (?2 IS NULL OR m.created_at < ?2)
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?3"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), before.map(format_timestamp), limit],
                    history_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(oldest_first(rows))
        })
    }

    fn query_membership(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT conversation_id FROM conversation_members WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(ids.iter().map(|id| parse_uuid(id)).collect())
        })
    }

    fn query_recent_contacts(&self, user_id: Uuid) -> Result<Vec<RecentConversationRow>> {
        self.with_conn(|conn| {
            // The second membership join only applies to direct conversations,
            // so group conversations yield exactly one row each.
            let mut stmt = conn.prepare(
                "SELECT c.id, c.type, c.name, c.avatar,
                        lm.created_at, lm.content,
                        u.id, u.name, u.avatar
                 FROM conversation_members cm
                 JOIN conversations c ON c.id = cm.conversation_id
                 LEFT JOIN messages lm ON lm.id = (
                     SELECT m.id FROM messages m
                     WHERE m.conversation_id = c.id
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT 1
                 )
                 LEFT JOIN conversation_members cm2
                     ON cm2.conversation_id = c.id
                    AND cm2.user_id != ?1
                    AND c.type = 'direct'
                 LEFT JOIN users u ON u.id = cm2.user_id
                 WHERE cm.user_id = ?1
                 ORDER BY lm.created_at IS NULL, lm.created_at DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id.to_string(), RECENT_CONTACTS_LIMIT], |row| {
                    Ok(RecentConversationRow {
                        conversation_id: parse_uuid(&row.get::<_, String>(0)?),
                        kind: row.get(1)?,
                        group_name: row.get(2)?,
                        group_avatar: row.get(3)?,
                        last_message_at: row.get::<_, Option<String>>(4)?.as_deref().map(parse_timestamp),
                        last_message_preview: row.get(5)?,
                        other_user_id: row.get::<_, Option<String>>(6)?.as_deref().map(parse_uuid),
                        other_user_name: row.get(7)?,
                        other_user_avatar: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    fn query_user_by_id(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    fn query_reply_preview(&self, message_id: Uuid) -> Result<Option<ReplyPreview>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sender_id, substr(content, 1, 120), type FROM messages WHERE id = ?1",
                    [message_id.to_string()],
                    |row| {
                        Ok(ReplyPreview {
                            id: parse_uuid(&row.get::<_, String>(0)?),
                            sender_id: parse_uuid(&row.get::<_, String>(1)?),
                            content: row.get(2)?,
                            kind: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    fn refresh_token_active(&self, token_hash: &str) -> Result<bool> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM refresh_tokens
                     WHERE token_hash = ?1 AND revoked_at IS NULL AND expires_at > ?2",
                    (token_hash, &now),
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

impl Database {
    // -- Directory --
    // Written by the account and conversation services; the gateway only reads.

    pub fn create_user(&self, name: &str, email: &str, avatar: Option<&str>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, avatar) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), name, email, avatar),
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn create_conversation(
        &self,
        kind: ConversationKind,
        name: Option<&str>,
        members: &[Uuid],
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let kind = match kind {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, type, name) VALUES (?1, ?2, ?3)",
                (id.to_string(), kind, name),
            )?;
            for member in members {
                add_member(conn, id, *member)?;
            }
            Ok(())
        })?;
        Ok(id)
    }

    pub fn add_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(|conn| add_member(conn, conversation_id, user_id))
    }

    // -- Refresh tokens --

    pub fn store_refresh_token(&self, user_id: Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                (token_hash, user_id.to_string(), format_timestamp(expires_at)),
            )?;
            Ok(())
        })
    }

    pub fn revoke_refresh_token(&self, token_hash: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE refresh_tokens SET revoked_at = ?2 WHERE token_hash = ?1 AND revoked_at IS NULL",
                (token_hash, now),
            )?;
            Ok(())
        })
    }
}

fn add_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
        (conversation_id.to_string(), user_id.to_string()),
    )?;
    Ok(())
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserProfile>> {
    let mut stmt = conn.prepare("SELECT id, name, email, avatar FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok(UserProfile {
                id: parse_uuid(&row.get::<_, String>(0)?),
                name: row.get(1)?,
                email: row.get(2)?,
                avatar: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn history_row(row: &Row<'_>) -> rusqlite::Result<HistoryMessage> {
    let reply_id: Option<String> = row.get(9)?;
    let reply_to = match reply_id {
        Some(id) => Some(ReplyPreview {
            id: parse_uuid(&id),
            sender_id: parse_uuid(&row.get::<_, String>(10)?),
            content: row.get(11)?,
            kind: row.get(12)?,
        }),
        None => None,
    };

    Ok(HistoryMessage {
        id: parse_uuid(&row.get::<_, String>(0)?),
        from: parse_uuid(&row.get::<_, String>(1)?),
        conversation_id: row.get::<_, Option<String>>(2)?.as_deref().map(parse_uuid),
        receiver_id: row.get::<_, Option<String>>(3)?.as_deref().map(parse_uuid),
        message: row.get(4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?),
        reactions: parse_reactions(&row.get::<_, String>(6)?),
        kind: row.get(7)?,
        status: MessageStatus::from_code(row.get(8)?),
        reply_to,
    })
}

/// Pages are fetched newest-first so LIMIT keeps the most recent rows; clients
/// render them oldest-first.
fn oldest_first(mut rows: Vec<HistoryMessage>) -> Vec<HistoryMessage> {
    rows.reverse();
    rows
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
