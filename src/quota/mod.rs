pub mod advisory;
pub mod ledger;
mod usage;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub use advisory::{Advisory, Severity, get_upgrade_advisory};
pub use ledger::{Consumed, LedgerConfig, QuotaEvent, QuotaLedger, QuotaSnapshot, QuotaState, Remaining};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(usage::limits))
        .route("/consume", post(usage::consume))
}
