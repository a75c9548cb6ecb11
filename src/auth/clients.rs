use std::fmt;

use anyhow::anyhow;
use oauth2::{AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl, basic::BasicClient};
use serde::Deserialize;
use serde_json::Value;

use crate::GetField;

pub(crate) type ProviderClient = Client<
    oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>,
    oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
    oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
    oauth2::StandardRevocableToken,
    oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>,
    oauth2::EndpointSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointSet,
>;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    /// Provider id as the identity toolkit knows it.
    pub fn id(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    fn slug(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => (
                "https://accounts.google.com/o/oauth2/auth",
                "https://oauth2.googleapis.com/token",
            ),
            Github => (
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
            ),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// OAuth clients for the configured providers plus the identity toolkit
/// endpoint that turns a provider token into our identity.
#[derive(Clone)]
pub struct Clients {
    pub(crate) idp_url: String,
    google_client: Option<ProviderClient>,
    github_client: Option<ProviderClient>,
}

impl Clients {
    pub fn from_json(json: &Value, public_url: &str) -> anyhow::Result<Clients> {
        let idp_url = format!(
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp?key={}",
            json.get_obj_field("firebase")?.get_str_field("apikey")?
        );

        let build = |provider: ClientProvider| -> anyhow::Result<Option<ProviderClient>> {
            let Some(json) = json.get(provider.slug()) else {
                return Ok(None);
            };
            let (auth_url, token_url) = provider.endpoints();
            let redirect_url = format!("{}/lockin/{}", public_url.trim_end_matches('/'), provider.slug());

            Ok(Some(
                BasicClient::new(ClientId::new(json.get_str_field("client_id")?))
                    .set_client_secret(ClientSecret::new(json.get_str_field("client_secret")?))
                    .set_auth_uri(AuthUrl::new(auth_url.to_owned())?)
                    .set_token_uri(TokenUrl::new(token_url.to_owned())?)
                    .set_redirect_uri(RedirectUrl::new(redirect_url)?),
            ))
        };

        Ok(Clients {
            idp_url,
            google_client: build(ClientProvider::Google)?,
            github_client: build(ClientProvider::Github)?,
        })
    }

    pub fn get_client(&self, provider: ClientProvider) -> anyhow::Result<ProviderClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }
        .ok_or_else(|| anyhow!("OAuth provider {provider} keys not supplied"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builds_only_configured_providers() {
        let secrets = json!({
            "firebase": { "apikey": "k" },
            "google": { "client_id": "id", "client_secret": "secret" },
        });
        let clients = Clients::from_json(&secrets, "http://localhost:8080/").unwrap();
        assert!(clients.idp_url.ends_with("key=k"));
        assert!(clients.get_client(ClientProvider::Google).is_ok());
        assert!(clients.get_client(ClientProvider::Github).is_err());
    }

    #[test]
    fn firebase_key_is_required() {
        assert!(Clients::from_json(&json!({}), "http://localhost").is_err());
    }
}
