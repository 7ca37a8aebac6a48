use anyhow::{bail, Context, Result};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::LineConfig;
use crate::error::ApiError;

const TOKEN_ENDPOINT: &str = "LINE token endpoint";
const PROFILE_ENDPOINT: &str = "LINE profile endpoint";

/// Channel access token issued by the client-credentials exchange.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    pub token_type: String,
}

impl Token {
    /// Value for the `Authorization` header, e.g. `Bearer abc...`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

// Keep the credential itself out of logs.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// LINE user profile. LINE omits `pictureUrl` and `statusMessage` when unset.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[allow(dead_code)]
#[serde(default, rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    pub user_id: String,
    pub language: String,
    /// Decoded for completeness; nothing is forwarded from it
    pub picture_url: String,
    /// Decoded for completeness; nothing is forwarded from it
    pub status_message: String,
}

pub struct LineClient {
    client: reqwest::Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl LineClient {
    pub fn new(client: reqwest::Client, config: &LineConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .with_context(|| format!("Invalid LINE API base URL: {}", config.api_base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("LINE API base URL cannot carry a path: {}", config.api_base_url);
        }
        Ok(Self {
            client,
            base_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    /// Build `{base}/{segments...}`, escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // base_url was checked to be a base in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Exchange the client credentials for a channel access token.
    pub async fn fetch_access_token(&self) -> Result<Token, ApiError> {
        let url = self.endpoint(&["v2", "oauth", "accessToken"]);
        debug!("Requesting LINE access token: {}", url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::network(TOKEN_ENDPOINT, e))?;

        decode_response(TOKEN_ENDPOINT, response).await
    }

    /// Fetch the profile of `user_id`, authenticating with `token`.
    pub async fn get_user(&self, user_id: &str, token: &Token) -> Result<UserProfile, ApiError> {
        let url = self.endpoint(&["v2", "bot", "profile", user_id]);
        debug!("Fetching LINE profile: {}", url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token.authorization())
            .send()
            .await
            .map_err(|e| ApiError::network(PROFILE_ENDPOINT, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized {
                endpoint: PROFILE_ENDPOINT,
            });
        }

        decode_response(PROFILE_ENDPOINT, response).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ApiError::network(endpoint, e))?;

    if !status.is_success() {
        return Err(ApiError::Status {
            endpoint,
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    serde_json::from_slice(&body).map_err(|source| ApiError::Decode { endpoint, source })
}
