use anyhow::{bail, Context, Result};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::info;

use crate::config::{IftttConfig, PayloadFormat};
use crate::error::ApiError;

const TRIGGER_ENDPOINT: &str = "IFTTT trigger endpoint";

/// Body of a Maker webhooks trigger.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TriggerPayload<'a> {
    /// Sender's display name.
    pub value1: &'a str,
    /// Bot name of the route the event arrived on.
    pub value2: &'a str,
}

pub struct IftttClient {
    client: reqwest::Client,
    /// Carries the account key; never log it.
    trigger_url: Url,
    format: PayloadFormat,
}

impl IftttClient {
    pub fn new(client: reqwest::Client, config: &IftttConfig) -> Result<Self> {
        let mut trigger_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid IFTTT base URL: {}", config.base_url))?;
        match trigger_url.path_segments_mut() {
            Ok(mut path) => {
                path.pop_if_empty().extend([
                    "trigger",
                    config.event.as_str(),
                    "with",
                    "key",
                    config.key.as_str(),
                ]);
            }
            Err(()) => bail!("IFTTT base URL cannot carry a path: {}", config.base_url),
        }

        Ok(Self {
            client,
            trigger_url,
            format: config.payload_format,
        })
    }

    /// Post `{value1: display_name, value2: bot_name}` to the trigger.
    ///
    /// Any completed HTTP exchange counts as success; the remote status is
    /// returned for logging only.
    pub async fn send(&self, display_name: &str, bot_name: &str) -> Result<StatusCode, ApiError> {
        let payload = TriggerPayload {
            value1: display_name,
            value2: bot_name,
        };

        let request = self.client.post(self.trigger_url.clone());
        let request = match self.format {
            PayloadFormat::Json => request.json(&payload),
            PayloadFormat::Form => request.form(&payload),
        };

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::network(TRIGGER_ENDPOINT, e))?;

        let status = response.status();
        info!("Response from IFTTT: {}", status);
        Ok(status)
    }
}
