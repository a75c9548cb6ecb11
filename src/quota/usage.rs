use axum::{
    Json, debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use time::OffsetDateTime;
use tower_sessions::Session;

use crate::{
    AppResult, AppState,
    error::Error,
    profiles::{ProfileBootstrap, require_profile},
};

use super::{Advisory, Consumed, QuotaLedger, QuotaSnapshot, get_upgrade_advisory};

#[derive(Serialize)]
pub(crate) struct LimitsResponse {
    pub(crate) limits: QuotaSnapshot,
    pub(crate) advisory: Option<Advisory>,
}

#[derive(Serialize)]
pub(crate) struct ConsumeResponse {
    #[serde(flatten)]
    pub(crate) consumed: Consumed,
    pub(crate) advisory: Option<Advisory>,
}

#[derive(Serialize)]
pub(crate) struct BlockedResponse {
    pub(crate) error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) next_reset: OffsetDateTime,
    pub(crate) advisory: Option<Advisory>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn limits(
    State(bootstrap): State<ProfileBootstrap>,
    State(ledger): State<QuotaLedger>,
    session: Session,
) -> AppResult<Json<LimitsResponse>> {
    let profile = require_profile(&session, &bootstrap).await?;
    let limits = ledger.limits(&profile.uid).await?;
    let advisory = get_upgrade_advisory(limits.used, limits.total, limits.is_premium);
    Ok(Json(LimitsResponse { limits, advisory }))
}

/// Called by the app around a message send. A send that is over quota is a
/// 429 carrying the blocked advisory, not an internal error.
#[debug_handler(state = AppState)]
pub(crate) async fn consume(
    State(bootstrap): State<ProfileBootstrap>,
    State(ledger): State<QuotaLedger>,
    session: Session,
) -> AppResult<Response> {
    let profile = require_profile(&session, &bootstrap).await?;

    match ledger.consume(&profile.uid).await {
        Ok(consumed) => {
            let advisory = get_upgrade_advisory(consumed.used, consumed.capacity, consumed.is_premium);
            Ok(Json(ConsumeResponse { consumed, advisory }).into_response())
        }
        Err(e @ Error::QuotaExceeded { capacity, next_reset }) => Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(BlockedResponse {
                error: e.to_string(),
                next_reset,
                advisory: get_upgrade_advisory(capacity, capacity, false),
            }),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}
