use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use tandem_db::PersistenceGateway;

use crate::GatewayConfig;
use crate::auth::CredentialVerifier;
use crate::calls::CallTable;
use crate::error::GatewayError;
use crate::membership::MembershipIndex;
use crate::registry::Registry;
use crate::session::Session;

/// Owns every piece of process-wide gateway state. Cheap to clone; each
/// clone refers to the same instance, and separate instances share nothing.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    pub(crate) store: Arc<dyn PersistenceGateway>,
    pub(crate) verifier: CredentialVerifier,
    pub(crate) config: GatewayConfig,

    /// user_id -> live sessions
    pub(crate) registry: RwLock<Registry>,

    /// conversation_id -> members seen since start-up
    pub(crate) membership: RwLock<MembershipIndex>,

    /// conversation_id -> ringing or active call
    pub(crate) calls: Mutex<CallTable>,
}

impl Gateway {
    pub fn new(store: Arc<dyn PersistenceGateway>, verifier: CredentialVerifier, config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                store,
                verifier,
                config,
                registry: RwLock::new(Registry::default()),
                membership: RwLock::new(MembershipIndex::default()),
                calls: Mutex::new(CallTable::default()),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Runs a blocking store call off the async workers.
    pub(crate) async fn with_store<F, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&dyn PersistenceGateway) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.store.clone();
        let value = tokio::task::spawn_blocking(move || f(store.as_ref())).await??;
        Ok(value)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.registry.read().await.is_online(user_id)
    }

    pub async fn session_count(&self, user_id: Uuid) -> usize {
        self.inner.registry.read().await.session_count(user_id)
    }

    pub async fn members_of(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.inner.membership.read().await.members_of(conversation_id)
    }

    pub async fn has_call(&self, conversation_id: Uuid) -> bool {
        self.inner.calls.lock().await.contains(conversation_id)
    }

    /// Merges the user's conversations from the store into the membership
    /// index.
    pub async fn ensure_loaded(&self, user_id: Uuid) -> Result<(), GatewayError> {
        let conversations = self.with_store(move |store| store.query_membership(user_id)).await?;
        debug!("User {} belongs to {} conversations", user_id, conversations.len());

        self.inner.membership.write().await.merge(user_id, conversations);
        Ok(())
    }

    /// Adds an authenticated session to the registry.
    pub(crate) async fn register(&self, session: &Session) {
        let Some(user) = session.user() else {
            return;
        };

        let count = self
            .inner
            .registry
            .write()
            .await
            .register(user, session.id(), session.sender());
        debug!("{} ({}) now has {} session(s)", user.name, user.id, count);
    }

    /// Removes the session. Returns false if it was never registered.
    pub(crate) async fn unregister(&self, session: &Session) -> bool {
        let Some(user) = session.user() else {
            return false;
        };

        let remaining = self.inner.registry.write().await.unregister(user.id, session.id());
        match remaining {
            Some(n) => {
                debug!("{} ({}) has {} session(s) left", user.name, user.id, n);
                true
            }
            None => false,
        }
    }
}
