use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Claims carried by both credential kinds: the bearer token sent in an
/// `auth` frame and the refresh token carried by the `refreshToken` cookie.
/// Only `sub` and `exp` are required; access tokens may also carry `email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
