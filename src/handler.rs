use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::RoutingPolicy,
    counter::DailyCounterStore,
    dispatch::{build_message, MailDispatcher},
    error::{RelayError, ValidationError},
    router::{ProviderDecision, ProviderRouter, SendRequest},
};

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DailyCounterStore>,
    pub router: Arc<ProviderRouter>,
    pub dispatcher: MailDispatcher,
}

// Response model
#[derive(Debug, Serialize)]
pub struct SendResponse {
    success: bool,
    used: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    sender_override: bool,
}

pub async fn send_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> impl IntoResponse {
    match send(&state, payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            match &err {
                RelayError::Validation(e) => warn!("Rejected send request: {}", e),
                other => error!("Send failed: {}", other),
            }
            err.into_response()
        }
    }
}

async fn send(
    state: &AppState,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<SendResponse, RelayError> {
    let Json(request) = payload.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;
    state.router.validate(&request)?;

    state.store.ensure_fresh().await?;
    let count = state.store.get_count().await?;

    let decision = state.router.decide(&request, count);
    let transport = decision.transport()?;

    if decision == ProviderDecision::UseFallback && state.router.policy() == RoutingPolicy::Limit {
        info!(
            count,
            limit = state.router.daily_limit(),
            "Primary daily limit reached, using fallback"
        );
    }

    let from = state.router.sender_for(&request)?;
    let message = build_message(
        from,
        request.to.as_deref().unwrap_or_default(),
        request.subject.as_deref().unwrap_or_default(),
        request.html.as_deref().unwrap_or_default(),
    )?;

    state.dispatcher.send(transport, message).await?;

    if decision.increments_counter() {
        let sent_today = state.store.increment().await?;
        info!(
            used = transport.keyword(),
            "Email sent. Used today: {}",
            usage_summary(&state.router, sent_today)
        );
    } else {
        info!(used = transport.keyword(), "Email sent via fallback");
    }

    Ok(SendResponse {
        success: true,
        used: transport.keyword(),
        sender_override: decision == ProviderDecision::UseSenderOverride,
    })
}

// The daily limit only means something under the limit policy.
fn usage_summary(router: &ProviderRouter, sent_today: u64) -> String {
    match router.policy() {
        RoutingPolicy::Limit => format!("{}/{}", sent_today, router.daily_limit()),
        RoutingPolicy::Explicit => sent_today.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_shows_the_limit_only_when_it_applies() {
        let limited = ProviderRouter::new(RoutingPolicy::Limit, 300, None);
        let explicit = ProviderRouter::new(RoutingPolicy::Explicit, 300, None);

        assert_eq!(usage_summary(&limited, 12), "12/300");
        assert_eq!(usage_summary(&explicit, 12), "12");
    }
}
