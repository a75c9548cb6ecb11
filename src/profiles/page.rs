use axum::{Json, debug_handler, extract::{Path, State}};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{AppResult, AppState, db::Profile, error::Error, handles::HandleAllocator};

use super::{ProfileBootstrap, require_profile};

#[derive(Deserialize)]
pub(crate) struct ChangeHandleBody {
    pub(crate) handle: String,
}

/// What anyone holding a share link may see.
#[derive(Debug, Serialize)]
pub(crate) struct PublicProfile {
    pub(crate) handle: String,
    pub(crate) display_name: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(
    State(bootstrap): State<ProfileBootstrap>,
    session: Session,
) -> AppResult<Json<Profile>> {
    Ok(Json(require_profile(&session, &bootstrap).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn change_handle(
    State(bootstrap): State<ProfileBootstrap>,
    State(allocator): State<HandleAllocator>,
    session: Session,
    Json(ChangeHandleBody { handle }): Json<ChangeHandleBody>,
) -> AppResult<Json<Profile>> {
    let profile = require_profile(&session, &bootstrap).await?;
    Ok(Json(allocator.change_handle(&profile.uid, &handle).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    Path(handle): Path<String>,
    State(bootstrap): State<ProfileBootstrap>,
    State(allocator): State<HandleAllocator>,
) -> AppResult<Json<PublicProfile>> {
    let Some(uid) = allocator.owner_of(&handle).await? else {
        return Err(Error::profile_not_found(format!("@{handle}")).into());
    };
    let Some(profile) = bootstrap.find(&uid).await? else {
        return Err(Error::profile_not_found(uid).into());
    };

    Ok(Json(PublicProfile {
        handle: profile.handle,
        display_name: profile.display_name,
    }))
}
