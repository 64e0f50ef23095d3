use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};

use crate::bridge::{BridgeError, ExtensionBridge};
use crate::classify::{Classifier, StructuredCommand, TriggerCommand};
use crate::config::Config;
use crate::platform::Platform;

/// One inbound chat message, as pushed by the platform.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub author_id: String,
    pub channel_id: String,
    pub text: String,
}

/// Shared application state, built once at startup from the immutable config.
pub struct AppState {
    pub classifier: Classifier,
    pub bridge: ExtensionBridge,
    pub platform: Arc<dyn Platform>,
    pub event_name: String,
}

impl AppState {
    pub fn new(config: &Config, platform: Arc<dyn Platform>) -> Result<Self> {
        Ok(Self {
            classifier: Classifier::new(config),
            bridge: ExtensionBridge::new(config.extension.clone())?,
            platform,
            event_name: config.commands.event_name.clone(),
        })
    }
}

/// Entry point for one inbound message. Both classification passes run and
/// both matches, when present, are acted on independently.
pub async fn handle_message(state: &AppState, msg: &ChatMessage) {
    let classification = state.classifier.classify(&msg.text);

    if let Some(trigger) = &classification.trigger {
        info!(
            "Trigger '{}' from user {} in channel {}",
            trigger.word, msg.author_id, msg.channel_id
        );
        // On failure no reply is posted and nothing is retried.
        if let Err(e) = forward_trigger(state, trigger, msg).await {
            error!("Trigger '{}' dropped: {}", trigger.word, e);
        }
    }

    if let Some(command) = &classification.structured {
        broadcast(state, command, &msg.author_id).await;
    }
}

/// Call the extension and deliver its reply as an ephemeral post to the
/// triggering user.
async fn forward_trigger(
    state: &AppState,
    trigger: &TriggerCommand,
    msg: &ChatMessage,
) -> Result<(), BridgeError> {
    let channel = state
        .platform
        .get_channel(&msg.channel_id)
        .await
        .map_err(BridgeError::Call)?;

    let reply = state.bridge.call(trigger, &msg.author_id, &channel).await?;

    state
        .platform
        .send_ephemeral(&reply)
        .await
        .map_err(BridgeError::Call)
}

/// Publish the structured command as a named event to the author's live
/// sessions. Fire-and-forget: a failed publish is logged, never surfaced.
async fn broadcast(state: &AppState, command: &StructuredCommand, author_id: &str) {
    let mut payload = json!({
        "action": command.action,
        "module": command.module,
    });
    if let Some(id) = command.id {
        payload["id"] = json!(id);
    }

    info!(
        "Broadcasting {} event '{}' for {} to user {}",
        state.event_name, command.action, command.module, author_id
    );

    if let Err(e) = state
        .platform
        .publish_event(&state.event_name, author_id, &payload)
        .await
    {
        warn!("Event publish failed, dropping: {:#}", e);
    }
}
