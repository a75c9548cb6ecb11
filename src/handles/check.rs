use axum::{Json, debug_handler, extract::{Query, State}};
use serde::{Deserialize, Serialize};

use crate::{
    AppResult, AppState,
    validation::{HandleValidation, validate_handle},
};

use super::{Availability, HandleAllocator};

#[derive(Deserialize)]
pub(crate) struct CheckQuery {
    pub(crate) candidate: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CheckResponse {
    pub(crate) candidate: String,
    pub(crate) validation: HandleValidation,
    pub(crate) availability: Option<Availability>,
    pub(crate) suggestions: Vec<String>,
}

/// Live feedback while a handle is typed. Availability is only looked up for
/// candidates that validate; the answer is advisory.
#[debug_handler(state = AppState)]
pub(crate) async fn check_handle(
    Query(CheckQuery { candidate }): Query<CheckQuery>,
    State(allocator): State<HandleAllocator>,
) -> AppResult<Json<CheckResponse>> {
    let validation = validate_handle(&candidate);
    if !validation.valid {
        return Ok(Json(CheckResponse {
            candidate,
            validation,
            availability: None,
            suggestions: Vec::new(),
        }));
    }

    let availability = allocator.check_availability(&candidate).await?;
    let suggestions = match availability {
        Availability::Taken => allocator.suggest_alternatives(&candidate).await?,
        Availability::Available => Vec::new(),
    };

    Ok(Json(CheckResponse {
        candidate,
        validation,
        availability: Some(availability),
        suggestions,
    }))
}
