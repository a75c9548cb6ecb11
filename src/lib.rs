pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handles;
pub mod profiles;
pub mod quota;
pub mod session;
pub mod store;
pub mod validation;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::error;

use crate::{
    clock::Clock,
    error::Error,
    handles::{AllocatorConfig, HandleAllocator},
    profiles::{BootstrapConfig, ProfileBootstrap},
    quota::{LedgerConfig, QuotaLedger},
    store::{HandleIndex, ProfileStore},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub allocator: HandleAllocator,
    pub ledger: QuotaLedger,
    pub bootstrap: ProfileBootstrap,
    pub clients: auth::Clients,
}

impl AppState {
    /// Wires the allocator, ledger and bootstrap to one store.
    pub fn new<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        clients: auth::Clients,
        allocator: AllocatorConfig,
        ledger: LedgerConfig,
        bootstrap: BootstrapConfig,
    ) -> Self
    where
        S: ProfileStore + HandleIndex + 'static,
    {
        let profiles: Arc<dyn ProfileStore> = store.clone();
        let index: Arc<dyn HandleIndex> = store;
        let allocator = HandleAllocator::new(index, profiles.clone(), clock.clone(), allocator);
        Self {
            ledger: QuotaLedger::new(profiles.clone(), clock.clone(), ledger),
            bootstrap: ProfileBootstrap::new(profiles, allocator.clone(), clock, bootstrap),
            allocator,
            clients,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(profiles::router())
        .nest("/h", handles::router())
        .nest("/q", quota::router())
        .with_state(state)
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> anyhow::Result<String>;
    fn get_obj_field(&self, field: &str) -> anyhow::Result<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> anyhow::Result<String> {
        Ok(
            self.get(field)
            .ok_or_else(|| anyhow::anyhow!("expected {field} in {self}"))?
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> anyhow::Result<&Value> {
        self.get(field)
            .filter(|v| v.is_object())
            .ok_or_else(|| anyhow::anyhow!("expected object {field} in {self}"))
    }
}

/// Raised by handlers that need a signed-in session.
#[derive(Debug, thiserror::Error)]
#[error("sign in required")]
pub struct SignInRequired;

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.0.is::<SignInRequired>() {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": self.0.to_string() }))).into_response();
        }

        let Some(err) = self.0.downcast_ref::<Error>() else {
            error!("{:#}", self.0);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}\n\n{}", self.0, self.0.backtrace()),
            )
                .into_response();
        };

        let status = match err {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::HandleTaken { .. } | Error::AllocationExhausted { .. } => StatusCode::CONFLICT,
            Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::ProfileNotFound { .. } => StatusCode::NOT_FOUND,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let mut body = json!({
            "error": err.to_string(),
            "retryable": err.is_retryable(),
        });
        match err {
            Error::Validation { report, .. } => body["validation"] = json!(report),
            Error::AllocationExhausted { .. } => {
                body["hint"] = json!("please choose a different handle");
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(Error);
apperr_impl!(SignInRequired);
apperr_impl!(serde_json::Error);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(reqwest::Error);

impl<E: core::error::Error + Send + Sync + 'static, R: oauth2::ErrorResponse + Send + Sync + 'static> From<oauth2::RequestTokenError<E, R>> for AppError {
    fn from(err: oauth2::RequestTokenError<E, R>) -> Self {
        Self(anyhow::Error::from(err))
    }
}
