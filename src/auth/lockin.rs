use axum::{
    debug_handler,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::{
    AppResult, AppState, GetField,
    db::Identity,
    profiles::ProfileBootstrap,
    session::{CSRF_STATE, IDENTITY, PKCE_VERIFIER, RETURN_URL, USER_ID},
};

use super::{Clients, clients::ClientProvider};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

/// Maps the identity toolkit's `signInWithIdp` answer onto an [`Identity`].
pub(crate) fn identity_from_idp(body: &Value, provider: ClientProvider) -> anyhow::Result<Identity> {
    let optional = |field: &str| {
        body.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    Ok(Identity {
        uid: body.get_str_field("localId")?,
        email: optional("email"),
        display_name: optional("displayName"),
        provider: optional("providerId").unwrap_or_else(|| provider.id().to_owned()),
        email_verified: body.get("emailVerified").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// OAuth callback. Signs the session in and bootstraps the profile. A failed
/// bootstrap does not fail the sign-in: the session stays signed in without
/// a profile and the next request retries.
#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(clients): State<Clients>,
    State(bootstrap): State<ProfileBootstrap>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);

    let Some(stored_state) = session.get::<String>(CSRF_STATE).await? else {
        return Err("no csrf_state".into());
    };
    if state.secret().as_str() != stored_state.as_str() {
        return Err("csrf tokens don't match".into());
    }

    let Some(pkce_verifier) = session.get::<String>(PKCE_VERIFIER).await? else {
        return Err("no pkce_verifier".into());
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client
        .post(&clients.idp_url)
        .json(&IdpRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: "http://localhost/".to_owned(),
            return_idp_credential: true,
            return_secure_token: true,
        })
        .send()
        .await?
        .json()
        .await?;

    let identity = identity_from_idp(&body, provider)?;
    session.insert(USER_ID, identity.uid.clone()).await?;
    session.insert(IDENTITY, identity.clone()).await?;

    match bootstrap.ensure_profile(&identity).await {
        Ok(profile) => info!(uid = %identity.uid, "welcome @{}", profile.handle),
        Err(e) => warn!(uid = %identity.uid, "signed in without a profile: {e}"),
    }

    let return_url: String = session
        .remove::<String>(RETURN_URL)
        .await?
        .unwrap_or_else(|| "/me".to_string());
    Ok(Redirect::to(return_url.as_str()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn identity_from_full_idp_response() {
        let body = json!({
            "localId": "abc123",
            "email": "jane@example.com",
            "displayName": "Jane",
            "providerId": "google.com",
            "emailVerified": true,
        });
        let identity = identity_from_idp(&body, ClientProvider::Google).unwrap();
        assert_eq!(identity.uid, "abc123");
        assert_eq!(identity.email.as_deref(), Some("jane@example.com"));
        assert_eq!(identity.display_name.as_deref(), Some("Jane"));
        assert!(identity.email_verified);
    }

    #[test]
    fn identity_from_sparse_idp_response() {
        let body = json!({ "localId": "abc123", "displayName": "" });
        let identity = identity_from_idp(&body, ClientProvider::Github).unwrap();
        assert_eq!(identity.display_name, None);
        assert_eq!(identity.provider, "github.com");
        assert!(!identity.email_verified);
    }

    #[test]
    fn local_id_is_required() {
        assert!(identity_from_idp(&json!({ "email": "x@y.z" }), ClientProvider::Google).is_err());
    }
}
