//! Keys of the values kept in the tower-sessions session.

pub const CSRF_STATE: &str = "csrf_state";
pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const RETURN_URL: &str = "return_url";
pub const USER_ID: &str = "user_id";
/// The provider's identity from the last sign-in, kept so a failed bootstrap
/// can be retried without signing in again.
pub const IDENTITY: &str = "identity";
