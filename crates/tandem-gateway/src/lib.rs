pub mod auth;
pub mod calls;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod membership;
pub mod registry;
pub mod session;

mod fanout;
mod handlers;
mod handshake;
mod signaling;

use std::time::Duration;

pub use auth::CredentialVerifier;
pub use error::{AuthError, GatewayError};
pub use gateway::Gateway;
pub use session::Session;

/// What the socket loop should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Ringing time before an unanswered call is recorded as missed.
    pub call_timeout: Duration,
    /// Window for an unauthenticated connection to send a valid `auth` frame.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}
