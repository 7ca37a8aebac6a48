use reqwest::StatusCode;
use thiserror::Error;

/// Failures from a single outbound API exchange.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{endpoint} rejected the access token")]
    Unauthorized { endpoint: &'static str },
}

impl ApiError {
    /// Wrap a transport error. The URL is dropped because the IFTTT trigger
    /// URL embeds the account key.
    pub fn network(endpoint: &'static str, source: reqwest::Error) -> Self {
        ApiError::Network {
            endpoint,
            source: source.without_url(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}
