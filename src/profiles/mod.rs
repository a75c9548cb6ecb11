pub mod bootstrap;
mod page;

use axum::{Router, routing::{get, put}};
use tower_sessions::Session;
use tracing::warn;

use crate::{
    AppResult, AppState, SignInRequired,
    db::{Identity, Profile},
    error::Error,
    session::{IDENTITY, USER_ID},
};

pub use bootstrap::{BootstrapConfig, ProfileBootstrap};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(page::me))
        .route("/me/handle", put(page::change_handle))
        .route("/p/{handle}", get(page::profile))
}

/// The signed-in user's profile. A session whose sign-in bootstrap failed has
/// the identity but no profile yet; bootstrap is retried here, once per
/// request, instead of in a loop.
pub(crate) async fn require_profile(session: &Session, bootstrap: &ProfileBootstrap) -> AppResult<Profile> {
    let Some(uid) = session.get::<String>(USER_ID).await? else {
        return Err(SignInRequired.into());
    };
    if let Some(profile) = bootstrap.find(&uid).await? {
        return Ok(profile);
    }

    let Some(identity) = session.get::<Identity>(IDENTITY).await? else {
        return Err(Error::profile_not_found(uid).into());
    };
    match bootstrap.ensure_profile(&identity).await {
        Ok(profile) => Ok(profile),
        Err(e) => {
            warn!(%uid, "bootstrap retry failed: {e}");
            Err(e.into())
        }
    }
}
