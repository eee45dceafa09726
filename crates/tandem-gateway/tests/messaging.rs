//! Gateway behaviour for handshake, presence and message fan-out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::io;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use common::Harness;
use tandem_db::models::{NewMessage, NewShare, ReactionState, RecalledMessage, RecentConversationRow, StoredMessage};
use tandem_db::{Database, PersistenceGateway};
use tandem_gateway::Flow;
use tandem_types::models::{HistoryMessage, MessageStatus, ReplyPreview, UserProfile};

/// The database, except that reply previews cannot be read.
struct PreviewOutage(Arc<Database>);

impl PersistenceGateway for PreviewOutage {
    fn insert_message(&self, msg: NewMessage) -> Result<StoredMessage> {
        self.0.insert_message(msg)
    }

    fn insert_share(&self, share: NewShare) -> Result<()> {
        self.0.insert_share(share)
    }

    fn append_reaction(&self, message_id: Uuid, emoji: &str) -> Result<Option<ReactionState>> {
        self.0.append_reaction(message_id, emoji)
    }

    fn set_recalled(&self, message_id: Uuid, requester_id: Uuid) -> Result<Option<RecalledMessage>> {
        self.0.set_recalled(message_id, requester_id)
    }

    fn insert_deletion_tombstone(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.0.insert_deletion_tombstone(message_id, user_id)
    }

    fn query_history(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
        requester_id: Uuid,
    ) -> Result<Vec<HistoryMessage>> {
        self.0.query_history(conversation_id, before, limit, requester_id)
    }

    fn query_direct_history(&self, user_id: Uuid, before: Option<DateTime<Utc>>, limit: u32) -> Result<Vec<HistoryMessage>> {
        self.0.query_direct_history(user_id, before, limit)
    }

    fn query_membership(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.0.query_membership(user_id)
    }

    fn query_recent_contacts(&self, user_id: Uuid) -> Result<Vec<RecentConversationRow>> {
        self.0.query_recent_contacts(user_id)
    }

    fn query_user_by_id(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.0.query_user_by_id(id)
    }

    fn query_reply_preview(&self, _message_id: Uuid) -> Result<Option<ReplyPreview>> {
        bail!("disk I/O error")
    }

    fn refresh_token_active(&self, token_hash: &str) -> Result<bool> {
        self.0.refresh_token_active(token_hash)
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn auth_frame_admits_and_greets() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    h.direct(ann, bob);

    let mut a = h.connect(ann).await;
    let frames = a.drain();
    let kinds: Vec<_> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["welcome", "recent_contacts", "conversions"]);

    assert_eq!(frames[0]["user"]["id"], ann.to_string());
    assert_eq!(frames[0]["user"]["name"], "Ann");
    let contacts = frames[1]["conversations"].as_array().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["type"], "direct");
    assert_eq!(contacts[0]["title"], "Bob");
    assert_eq!(contacts[0]["online"], false);
    assert_eq!(frames[2]["users"][0]["name"], "Ann");
    assert!(h.gateway.is_online(ann).await);
}

#[tokio::test]
async fn frames_before_auth_are_rejected_but_connection_stays() {
    let h = Harness::new();
    let mut c = h.open();

    let flow = c
        .send(json!({ "type": "chat", "conversationId": Uuid::new_v4(), "message": "hi" }))
        .await;
    assert_eq!(flow, Flow::Continue);

    let frames = c.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["message"], "Unauthorized");
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let mut a = h.connect(ann).await;
    a.drain();

    let gateway = a.gateway.clone();
    assert_eq!(gateway.handle_text(&mut a.session, "not json").await, Flow::Continue);
    assert_eq!(gateway.handle_text(&mut a.session, r#"{"type":"typing"}"#).await, Flow::Continue);
    assert!(a.drain().is_empty());
    assert!(a.session.is_authenticated());
}

/// Log sink shared with the test body.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn malformed_auth_frame_does_not_log_its_token() {
    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::new();
    let mut c = h.open();
    let truncated = r#"{"type":"auth","token":"eyJhbGciOiJIUzI1NiJ9.very-secret-payload","#;
    assert_eq!(c.gateway.clone().handle_text(&mut c.session, truncated).await, Flow::Continue);
    assert!(c.drain().is_empty());

    let written = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(written.contains("bad frame"));
    assert!(!written.contains("very-secret-payload"));
}

#[tokio::test]
async fn auth_failures_close_with_typed_error() {
    let h = Harness::new();

    let mut c = h.open();
    assert_eq!(c.send(json!({ "type": "auth" })).await, Flow::Close);
    assert_eq!(c.take("auth_error")[0]["message"], "Missing access token");

    let mut c = h.open();
    assert_eq!(c.send(json!({ "type": "auth", "token": "garbage" })).await, Flow::Close);
    assert_eq!(c.take("auth_error")[0]["message"], "Invalid or expired token");

    let ghost = Uuid::new_v4();
    let token = tandem_gateway::auth::issue_token(common::ACCESS_SECRET, ghost, chrono::Duration::minutes(5)).unwrap();
    let mut c = h.open();
    assert_eq!(c.send(json!({ "type": "auth", "token": token })).await, Flow::Close);
    assert_eq!(c.take("auth_error")[0]["message"], "User not found");
    assert!(!c.session.is_authenticated());
}

#[tokio::test]
async fn second_auth_is_ignored() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let mut a = h.connect(ann).await;
    a.drain();

    assert_eq!(a.send(json!({ "type": "auth", "token": "garbage" })).await, Flow::Continue);
    assert!(a.drain().is_empty());
    assert_eq!(h.gateway.session_count(ann).await, 1);
}

#[tokio::test]
async fn refresh_cookie_admits_only_active_tokens() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let token = tandem_gateway::auth::issue_token(common::REFRESH_SECRET, ann, chrono::Duration::days(7)).unwrap();
    let hash = tandem_gateway::auth::hash_token(&token);

    // Signed but never issued by the store
    let mut c = h.open();
    assert_eq!(h.gateway.authenticate_with_cookie(&mut c.session, &token).await, Flow::Close);
    assert_eq!(c.take("auth_error").len(), 1);

    h.db
        .store_refresh_token(ann, &hash, chrono::Utc::now() + chrono::Duration::days(7))
        .unwrap();
    let mut c = h.open();
    assert_eq!(h.gateway.authenticate_with_cookie(&mut c.session, &token).await, Flow::Continue);
    assert_eq!(c.take("welcome").len(), 1);

    h.db.revoke_refresh_token(&hash).unwrap();
    let mut c = h.open();
    assert_eq!(h.gateway.authenticate_with_cookie(&mut c.session, &token).await, Flow::Close);
    let revoked = c.take("auth_error").remove(0);

    // A forged cookie reads the same as a revoked one
    let forged = tandem_gateway::auth::issue_token("not-the-secret", ann, chrono::Duration::days(7)).unwrap();
    let mut c = h.open();
    assert_eq!(h.gateway.authenticate_with_cookie(&mut c.session, &forged).await, Flow::Close);
    let bad_signature = c.take("auth_error").remove(0);

    assert_eq!(revoked["message"], "Invalid or expired refresh token");
    assert_eq!(bad_signature["message"], revoked["message"]);
}

// ============================================================================
// Presence
// ============================================================================

#[tokio::test]
async fn last_session_close_removes_user_from_presence() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");

    let a1 = h.connect(ann).await;
    let a2 = h.connect(ann).await;
    let mut b = h.connect(bob).await;
    b.drain();

    // One of two sessions closing keeps Ann online
    a1.close().await;
    let update = b.take("conversions");
    assert_eq!(update.len(), 1);
    assert_eq!(update[0]["users"].as_array().unwrap().len(), 2);
    assert!(h.gateway.is_online(ann).await);

    a2.close().await;
    let update = b.take("conversions");
    let users = update[0]["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], bob.to_string());
    assert!(!h.gateway.is_online(ann).await);
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn chat_reaches_every_session_once() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.group("crew", &[ann, bob]);

    let mut a1 = h.connect(ann).await;
    let mut a2 = h.connect(ann).await;
    let mut b = h.connect(bob).await;
    a1.drain();
    a2.drain();
    b.drain();

    a1.send(json!({ "type": "chat", "conversationId": conv, "message": "hi" }))
        .await;

    for client in [&mut a1, &mut a2, &mut b] {
        let frames = client.drain();
        let chats: Vec<_> = frames.iter().filter(|f| f["type"] == "chat").collect();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0]["payload"]["message"], "hi");
        assert_eq!(chats[0]["payload"]["from"], ann.to_string());
        assert_eq!(chats[0]["payload"]["type"], "text");
        assert_eq!(chats[0]["payload"]["conversationId"], conv.to_string());

        let contacts: Vec<_> = frames.iter().filter(|f| f["type"] == "recent_contacts").collect();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0]["conversations"][0]["lastMessagePreview"], "hi");
    }

    let rows = h.db.query_history(conv, None, 10, bob).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].from, ann);
}

#[tokio::test]
async fn reply_carries_truncated_preview() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a = h.connect(ann).await;
    let mut b = h.connect(bob).await;

    let long = "x".repeat(300);
    a.send(json!({ "type": "chat", "conversationId": conv, "message": long }))
        .await;
    let original = b.take("chat")[0]["payload"]["id"].as_str().unwrap().to_string();
    a.drain();

    b.send(json!({
        "type": "chat",
        "conversationId": conv,
        "message": "agreed",
        "replyTo": original,
    }))
    .await;

    let chat = &a.take("chat")[0];
    let preview = &chat["payload"]["reply_to"];
    assert_eq!(preview["id"], original);
    assert_eq!(preview["sender_id"], ann.to_string());
    assert_eq!(preview["content"].as_str().unwrap().len(), 120);
    assert_eq!(preview["type"], "text");
}

#[tokio::test]
async fn reply_is_delivered_when_preview_lookup_fails() {
    let h = Harness::with_store(|db| Arc::new(PreviewOutage(db)));
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a = h.connect(ann).await;
    let mut b = h.connect(bob).await;

    a.send(json!({ "type": "chat", "conversationId": conv, "message": "lunch?" }))
        .await;
    let original = b.take("chat")[0]["payload"]["id"].as_str().unwrap().to_string();
    a.drain();

    b.send(json!({
        "type": "chat",
        "conversationId": conv,
        "message": "sure",
        "replyTo": original,
    }))
    .await;

    let frames = a.drain();
    let chat = frames.iter().find(|f| f["type"] == "chat").expect("reply was not delivered");
    assert_eq!(chat["payload"]["message"], "sure");
    assert!(chat["payload"]["reply_to"].is_null());
    assert!(frames.iter().any(|f| f["type"] == "recent_contacts"));
}

#[tokio::test]
async fn offline_members_are_skipped() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.group("crew", &[ann, bob]);

    let b = h.connect(bob).await;
    b.close().await;

    let mut a = h.connect(ann).await;
    a.drain();
    a.send(json!({ "type": "chat", "conversationId": conv, "message": "anyone?" }))
        .await;

    assert_eq!(a.take("chat").len(), 1);
    // Persisted for Bob to pull later
    assert_eq!(h.db.query_history(conv, None, 10, bob).unwrap().len(), 1);
}

#[tokio::test]
async fn reactions_accumulate_in_order() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a = h.connect(ann).await;
    let mut b = h.connect(bob).await;

    a.send(json!({ "type": "chat", "conversationId": conv, "message": "lunch?" }))
        .await;
    let id = b.take("chat")[0]["payload"]["id"].as_str().unwrap().to_string();
    a.drain();

    b.send(json!({ "type": "reaction", "messageId": id, "reaction": "👍" }))
        .await;
    a.send(json!({ "type": "reaction", "messageId": id, "reaction": "🍕" }))
        .await;

    for client in [&mut a, &mut b] {
        let updates = client.take("reaction_update");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1]["messageId"], id);
        assert_eq!(updates[1]["conversationId"], conv.to_string());
        assert_eq!(updates[1]["reactions"], json!(["👍", "🍕"]));
    }
}

#[tokio::test]
async fn reaction_on_unknown_message_is_silent() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let mut a = h.connect(ann).await;
    a.drain();

    let flow = a
        .send(json!({ "type": "reaction", "messageId": Uuid::new_v4(), "reaction": "👍" }))
        .await;
    assert_eq!(flow, Flow::Continue);
    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn recall_only_by_sender() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a = h.connect(ann).await;
    let mut b = h.connect(bob).await;

    a.send(json!({ "type": "chat", "conversationId": conv, "message": "oops" }))
        .await;
    let id = b.take("chat")[0]["payload"]["id"].as_str().unwrap().to_string();
    a.drain();

    b.send(json!({ "type": "recall", "messageId": id })).await;
    let frames = b.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert!(a.drain().is_empty());
    assert_eq!(
        h.db.query_history(conv, None, 10, ann).unwrap()[0].status,
        MessageStatus::Normal
    );

    a.send(json!({ "type": "recall", "messageId": id })).await;
    for client in [&mut a, &mut b] {
        let recalled = client.take("message_recalled");
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0]["messageId"], id);
    }
    assert_eq!(
        h.db.query_history(conv, None, 10, bob).unwrap()[0].status,
        MessageStatus::Recalled
    );
}

#[tokio::test]
async fn delete_hides_message_for_requester_only() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a1 = h.connect(ann).await;
    let mut a2 = h.connect(ann).await;
    let mut b = h.connect(bob).await;

    a1.send(json!({ "type": "chat", "conversationId": conv, "message": "secret" }))
        .await;
    let id = b.take("chat")[0]["payload"]["id"].as_str().unwrap().to_string();
    a1.drain();
    a2.drain();

    a1.send(json!({ "type": "delete", "messageId": id })).await;
    // Repeating is harmless
    a1.send(json!({ "type": "delete", "messageId": id })).await;

    assert_eq!(a1.take("message_deleted_self").len(), 2);
    assert_eq!(a2.take("message_deleted_self").len(), 2);
    assert!(b.drain().is_empty());

    a1.send(json!({ "type": "load_messages", "conversationId": conv }))
        .await;
    let page = &a1.take("messages")[0];
    assert!(page["rows"].as_array().unwrap().is_empty());
    // The reply goes to the requesting session only
    assert!(a2.take("messages").is_empty());

    b.send(json!({ "type": "load_messages", "conversationId": conv }))
        .await;
    let page = &b.take("messages")[0];
    assert_eq!(page["rows"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn load_messages_pages_backwards() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a = h.connect(ann).await;

    for i in 0..12 {
        a.send(json!({ "type": "chat", "conversationId": conv, "message": format!("m{i}") }))
            .await;
    }
    a.drain();

    a.send(json!({ "type": "load_messages", "conversationId": conv }))
        .await;
    let page = a.take("messages").remove(0);
    let rows = page["rows"].as_array().unwrap();
    assert_eq!(page["conversationId"], conv.to_string());
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0]["message"], "m2");
    assert_eq!(rows[9]["message"], "m11");

    let cursor = rows[0]["created_at"].clone();
    a.send(json!({
        "type": "load_messages",
        "conversationId": conv,
        "firstMsg": { "created_at": cursor },
    }))
    .await;
    let page = a.take("messages").remove(0);
    let rows = page["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["message"], "m0");
    assert_eq!(rows[1]["message"], "m1");
}

#[tokio::test]
async fn cursor_without_timestamp_loads_newest_page() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let conv = h.direct(ann, bob);
    let mut a = h.connect(ann).await;

    a.send(json!({ "type": "chat", "conversationId": conv, "message": "first" }))
        .await;
    a.drain();

    for first_msg in [json!({ "id": "x" }), json!({ "created_at": null })] {
        a.send(json!({ "type": "load_messages", "conversationId": conv, "firstMsg": first_msg }))
            .await;
        let pages = a.take("messages");
        assert_eq!(pages.len(), 1);
        let rows = pages[0]["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["message"], "first");
    }
}

#[tokio::test]
async fn share_duplicates_into_each_target() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let source = h.direct(ann, bob);
    let first = h.group("one", &[ann, bob]);
    let second = h.group("two", &[ann, bob]);
    let mut a = h.connect(ann).await;
    let mut b = h.connect(bob).await;
    a.drain();
    b.drain();

    a.send(json!({
        "type": "message_share",
        "fromConversationId": source,
        "targetConversationIds": [first, second],
        "note": "fyi",
        "messages": [
            { "message": "look", "type": "text" },
            { "message": "https://example.com/cat.png", "type": "image" },
        ],
    }))
    .await;

    let chats = b.take("chat");
    assert_eq!(chats.len(), 4);
    assert!(chats.iter().all(|c| c["payload"]["type"] == "share"));
    for target in [first, second] {
        let in_target = chats
            .iter()
            .filter(|c| c["payload"]["conversationId"] == target.to_string())
            .count();
        assert_eq!(in_target, 2);

        // Stored rows keep the source type
        let rows = h.db.query_history(target, None, 10, bob).unwrap();
        let mut kinds: Vec<_> = rows.iter().map(|r| r.kind.as_str()).collect();
        kinds.sort();
        assert_eq!(kinds, ["image", "text"]);
    }
}

// ============================================================================
// Legacy direct chat
// ============================================================================

#[tokio::test]
async fn direct_chat_reaches_receiver_and_echoes_to_sender() {
    let h = Harness::new();
    let ann = h.user("Ann");
    let bob = h.user("Bob");
    let cid = h.user("Cid");
    let mut a = h.connect(ann).await;
    let mut b = h.connect(bob).await;
    let mut c = h.connect(cid).await;
    a.drain();
    b.drain();
    c.drain();

    a.send(json!({ "type": "chat", "to": bob, "message": "psst" })).await;
    let got = b.take("chat");
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["from"], "Ann");
    assert_eq!(got[0]["message"], "psst");
    assert_eq!(a.take("chat").len(), 1);
    assert!(c.drain().is_empty());

    a.send(json!({ "type": "chat", "to": "all", "message": "hello all" }))
        .await;
    for client in [&mut a, &mut b, &mut c] {
        let got = client.take("chat");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["to"], "all");
    }

    // Cid sees the broadcast but not the private message
    c.send(json!({ "type": "load_messages" })).await;
    let page = c.take("messages").remove(0);
    let rows = page["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["message"], "hello all");

    b.send(json!({ "type": "load_messages" })).await;
    let page = b.take("messages").remove(0);
    assert_eq!(page["rows"].as_array().unwrap().len(), 2);
}
