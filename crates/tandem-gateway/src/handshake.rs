use tracing::{error, info, warn};
use uuid::Uuid;

use tandem_types::events::OutboundFrame;
use tandem_types::models::UserProfile;

use crate::Flow;
use crate::auth::hash_token;
use crate::error::AuthError;
use crate::gateway::Gateway;
use crate::session::Session;

const WELCOME_MESSAGE: &str = "Authenticated & connected";

impl Gateway {
    /// Admission through an `auth` frame carrying an access token.
    pub async fn authenticate_with_token(&self, session: &mut Session, token: Option<String>) -> Flow {
        let token = token.as_deref().map(str::trim).filter(|t| !t.is_empty());

        let result = match token {
            None => Err(AuthError::MissingToken),
            Some(token) => match self.inner.verifier.verify_access(token) {
                Ok(claims) => self.resolve_user(claims.sub).await,
                Err(e) => Err(e),
            },
        };

        self.finish_handshake(session, result).await
    }

    /// Admission at connection open from the `refreshToken` cookie.
    pub async fn authenticate_with_cookie(&self, session: &mut Session, refresh_token: &str) -> Flow {
        let result = self.verify_cookie(refresh_token).await;
        self.finish_handshake(session, result).await
    }

    async fn verify_cookie(&self, refresh_token: &str) -> Result<UserProfile, AuthError> {
        let claims = self.inner.verifier.verify_refresh(refresh_token)?;

        let hash = hash_token(refresh_token);
        let active = self
            .with_store(move |store| store.refresh_token_active(&hash))
            .await?;
        if !active {
            return Err(AuthError::RevokedToken);
        }

        self.resolve_user(claims.sub).await
    }

    async fn resolve_user(&self, user_id: Uuid) -> Result<UserProfile, AuthError> {
        self.with_store(move |store| store.query_user_by_id(user_id))
            .await?
            .ok_or(AuthError::UnknownUser)
    }

    async fn finish_handshake(&self, session: &mut Session, result: Result<UserProfile, AuthError>) -> Flow {
        let result = match result {
            Ok(user) => self.admit(session, user).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!("Authentication failed on session {}: {:?}", session.id(), e);
                session.send(OutboundFrame::AuthError { message: e.to_string() });
                Flow::Close
            }
        }
    }

    /// Loads membership, greets the session, then makes it visible to
    /// everyone else.
    async fn admit(&self, session: &mut Session, user: UserProfile) -> Result<(), AuthError> {
        self.ensure_loaded(user.id).await?;
        session.bind(user.clone());

        session.send(OutboundFrame::Welcome {
            user: user.clone(),
            message: WELCOME_MESSAGE.to_string(),
        });

        match self.recent_contacts(user.id).await {
            Ok(conversations) => session.send(OutboundFrame::RecentContacts { conversations }),
            Err(e) => error!("Failed to load recent contacts for {}: {}", user.id, e),
        }

        self.register(session).await;
        self.broadcast_presence().await;

        info!("{} ({}) authenticated", user.name, user.id);
        Ok(())
    }

    /// Removes the session and, if it was admitted, tells everyone.
    pub async fn disconnect(&self, session: &Session) {
        if !self.unregister(session).await {
            return;
        }

        if let Some(user) = session.user() {
            info!("{} ({}) disconnected", user.name, user.id);
        }
        self.broadcast_presence().await;
    }
}
