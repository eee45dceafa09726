//! Shared harness: a gateway over a private in-memory store, and clients
//! that talk to it through the same text-frame entry point as the socket loop.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_db::{Database, PersistenceGateway};
use tandem_gateway::auth::issue_token;
use tandem_gateway::{CredentialVerifier, Flow, Gateway, GatewayConfig, Session};
use tandem_types::events::OutboundFrame;
use tandem_types::models::ConversationKind;

pub const ACCESS_SECRET: &str = "test-access-secret";
pub const REFRESH_SECRET: &str = "test-refresh-secret";

pub struct Harness {
    pub db: Arc<Database>,
    pub gateway: Gateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::build(config, |db| db)
    }

    /// Gateway over a store built around the in-memory database, for
    /// injecting failures. Fixtures still go straight to the database.
    pub fn with_store(wrap: impl FnOnce(Arc<Database>) -> Arc<dyn PersistenceGateway>) -> Self {
        Self::build(GatewayConfig::default(), wrap)
    }

    fn build(config: GatewayConfig, wrap: impl FnOnce(Arc<Database>) -> Arc<dyn PersistenceGateway>) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = wrap(db.clone());
        let gateway = Gateway::new(store, CredentialVerifier::new(ACCESS_SECRET, REFRESH_SECRET), config);
        Self { db, gateway }
    }

    pub fn user(&self, name: &str) -> Uuid {
        self.db
            .create_user(name, &format!("{}@example.com", name.to_lowercase()), None)
            .unwrap()
    }

    pub fn group(&self, name: &str, members: &[Uuid]) -> Uuid {
        self.db
            .create_conversation(ConversationKind::Group, Some(name), members)
            .unwrap()
    }

    pub fn direct(&self, a: Uuid, b: Uuid) -> Uuid {
        self.db
            .create_conversation(ConversationKind::Direct, None, &[a, b])
            .unwrap()
    }

    /// Opens an unauthenticated client.
    pub fn open(&self) -> Client {
        let (session, rx) = Session::new();
        Client {
            gateway: self.gateway.clone(),
            session,
            rx,
        }
    }

    /// Opens a client and authenticates it with an `auth` frame.
    pub async fn connect(&self, user_id: Uuid) -> Client {
        let mut client = self.open();
        let token = issue_token(ACCESS_SECRET, user_id, chrono::Duration::minutes(15)).unwrap();
        let flow = client
            .send(serde_json::json!({ "type": "auth", "token": token }))
            .await;
        assert_eq!(flow, Flow::Continue);
        assert!(client.session.is_authenticated());
        client
    }
}

pub struct Client {
    pub gateway: Gateway,
    pub session: Session,
    pub rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl Client {
    pub async fn send(&mut self, frame: Value) -> Flow {
        self.gateway.handle_text(&mut self.session, &frame.to_string()).await
    }

    pub async fn close(&self) {
        self.gateway.disconnect(&self.session).await;
    }

    /// Everything queued so far, as JSON.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(serde_json::to_value(&frame).unwrap());
        }
        frames
    }

    /// Queued frames of one `type`; everything else is discarded.
    pub fn take(&mut self, kind: &str) -> Vec<Value> {
        self.drain().into_iter().filter(|f| f["type"] == kind).collect()
    }

    /// Waits for the next frame of one `type`, skipping others.
    pub async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.rx.recv().await.expect("session queue closed");
            let value = serde_json::to_value(&frame).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }
}
