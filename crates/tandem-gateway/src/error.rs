use thiserror::Error;

/// Failure of a single gateway operation. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Handshake failure. The `Display` text is what the client sees in the
/// `auth_error` frame, so it never carries internal detail.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing access token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid or expired refresh token")]
    RevokedToken,

    #[error("User not found")]
    UnknownUser,

    #[error("Authentication unavailable")]
    Unavailable(#[from] GatewayError),
}
