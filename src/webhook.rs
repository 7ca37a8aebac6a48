use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::{post, MethodRouter};
use serde::Deserialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::ifttt::IftttClient;
use crate::line::{LineClient, UserProfile};
use crate::token::TokenStore;

/// Body of a LINE webhook POST.
#[derive(Debug, Default, Deserialize)]
pub struct InboundEventBatch {
    #[serde(default)]
    pub events: Vec<InboundEvent>,
}

#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub source: EventSource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub user_id: String,
}

impl InboundEvent {
    pub fn is_message(&self) -> bool {
        self.kind == "message"
    }
}

/// What happened to one event of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a message event; no outbound calls.
    Ignored,
    ProfileFailed,
    EmptyDisplayName,
    Forwarded,
    ForwardFailed,
}

/// Outcome of one webhook request, for logs and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub malformed: bool,
    pub outcomes: Vec<EventOutcome>,
}

impl BatchReport {
    pub fn count(&self, outcome: EventOutcome) -> usize {
        self.outcomes.iter().filter(|o| **o == outcome).count()
    }
}

/// Resolves each message sender's profile and forwards the name to IFTTT.
pub struct Relay {
    line: Arc<LineClient>,
    tokens: Arc<TokenStore>,
    ifttt: IftttClient,
    skip_empty_display_name: bool,
}

impl Relay {
    pub fn new(
        line: Arc<LineClient>,
        tokens: Arc<TokenStore>,
        ifttt: IftttClient,
        skip_empty_display_name: bool,
    ) -> Self {
        Self {
            line,
            tokens,
            ifttt,
            skip_empty_display_name,
        }
    }

    /// Process a raw webhook body. Never fails: every problem is logged and
    /// recorded in the report. Events are handled one after another in
    /// arrival order.
    pub async fn handle_batch(&self, bot_name: &str, body: &[u8]) -> BatchReport {
        let batch: InboundEventBatch = match serde_json::from_slice(body) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Ignoring malformed webhook body: {}", e);
                return BatchReport {
                    malformed: true,
                    outcomes: Vec::new(),
                };
            }
        };

        let mut outcomes = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            outcomes.push(self.relay_event(bot_name, event).await);
        }

        BatchReport {
            malformed: false,
            outcomes,
        }
    }

    async fn relay_event(&self, bot_name: &str, event: &InboundEvent) -> EventOutcome {
        debug!("Event type: {}", event.kind);
        if !event.is_message() {
            return EventOutcome::Ignored;
        }

        let user_id = &event.source.user_id;
        let profile = match self.resolve_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Could not resolve profile for {}: {}", user_id, e);
                return EventOutcome::ProfileFailed;
            }
        };

        debug!(
            "Profile {} (language {:?}): display name {:?}, bot name: {}",
            profile.user_id, profile.language, profile.display_name, bot_name
        );
        if profile.display_name.is_empty() && self.skip_empty_display_name {
            info!("Profile {} has no display name, not forwarding", user_id);
            return EventOutcome::EmptyDisplayName;
        }

        match self.ifttt.send(&profile.display_name, bot_name).await {
            Ok(_) => EventOutcome::Forwarded,
            Err(e) => {
                warn!("Could not forward event from {}: {}", user_id, e);
                EventOutcome::ForwardFailed
            }
        }
    }

    /// Look up a profile, refreshing the token and retrying once if LINE
    /// rejects it.
    async fn resolve_profile(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        let token = self.tokens.current().await?;
        match self.line.get_user(user_id, &token).await {
            Err(e) if e.is_unauthorized() => {
                warn!("{}; retrying with a fresh token", e);
                let fresh = self.tokens.invalidate(&token).await?;
                self.line.get_user(user_id, &fresh).await
            }
            other => other,
        }
    }
}

/// Handler for one webhook route. Always answers 200 with an empty body,
/// including for bodies over `max_body_bytes`, which are dropped unread.
pub fn forward(relay: Arc<Relay>, bot_name: String, max_body_bytes: usize) -> MethodRouter {
    let bot_name: Arc<str> = bot_name.into();
    post(move |body: Body| {
        let relay = relay.clone();
        let bot_name = bot_name.clone();
        let span = info_span!("webhook", request_id = %Uuid::new_v4(), bot = %bot_name);
        async move {
            info!("Handling request ...");
            let body = match axum::body::to_bytes(body, max_body_bytes).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Ignoring webhook body (limit {} bytes): {}", max_body_bytes, e);
                    return StatusCode::OK;
                }
            };
            let report = relay.handle_batch(&bot_name, &body).await;
            info!(
                malformed = report.malformed,
                events = report.outcomes.len(),
                forwarded = report.count(EventOutcome::Forwarded),
                "Done"
            );
            StatusCode::OK
        }
        .instrument(span)
    })
}
