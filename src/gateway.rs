use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};

use crate::bridge::{payload_to_post, WebhookPayload};
use crate::dispatch::{self, AppState, ChatMessage};
use crate::sync::{self, ExternalUser};

/// Inbound chat-message push from the platform.
#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    pub user_id: String,
    pub channel_id: String,
    pub text: String,
}

/// Webhook-style payload relayed verbatim as an ephemeral post.
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub user_id: String,
    pub channel_id: String,
    #[serde(flatten)]
    pub payload: WebhookPayload,
}

pub fn router(state: Arc<AppState>) -> Router {
    // Unrouted paths fall through to axum's default 404.
    Router::new()
        .route("/hello", get(hello))
        .route("/syncuser", post(sync_user))
        .route("/postmessage", post(post_message))
        .route("/event", post(receive_event))
        .with_state(state)
}

async fn hello() -> &'static str {
    "Anvil listening"
}

/// Directory sync: find-or-create the account, reconcile teams, return the
/// canonical user. Partial team failures are logged inside `reconcile` and
/// do not affect the response.
async fn sync_user(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ExternalUser>,
) -> Result<Json<ExternalUser>, (StatusCode, String)> {
    match sync::reconcile(state.platform.as_ref(), &record).await {
        Ok(outcome) => Ok(Json(outcome.user)),
        Err(e) => {
            error!("Directory sync failed for '{}': {}", record.user_name, e);
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// Relay an already-formed payload as an ephemeral post. No classification,
/// no bridging; the attachments prop is always set, even when empty.
async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RelayRequest>,
) -> StatusCode {
    let post = payload_to_post(&request.user_id, &request.channel_id, request.payload);

    match state.platform.send_ephemeral(&post).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("Message relay failed: {:#}", e);
            StatusCode::BAD_GATEWAY
        }
    }
}

/// One inbound chat message. Pipeline failures are logged by the dispatcher;
/// the platform push always gets a 200 back.
async fn receive_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InboundEvent>,
) -> StatusCode {
    info!(
        "Message event from user {} in channel {}",
        event.user_id, event.channel_id
    );

    let msg = ChatMessage {
        author_id: event.user_id,
        channel_id: event.channel_id,
        text: event.text,
    };
    dispatch::handle_message(&state, &msg).await;

    StatusCode::OK
}
