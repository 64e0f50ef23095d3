use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::classify::TriggerCommand;
use crate::config::ExtensionConfig;
use crate::platform::{ChannelInfo, EphemeralPost};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Transport failure, timeout, or unusable request metadata. Surfaced,
    /// never retried.
    #[error("extension call failed: {0:#}")]
    Call(#[source] anyhow::Error),
    /// The extension violated the response contract.
    #[error("malformed extension response: {0}")]
    MalformedResponse(String),
}

/// Webhook-style reply from the extension.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookPayload {
    #[serde(default)]
    pub text: String,
    pub attachments: Option<Vec<Value>>,
    pub props: Option<serde_json::Map<String, Value>>,
}

/// Translate a webhook payload into an ephemeral post, as-is.
///
/// The `attachments` prop is always set, even when empty, so consumers can
/// tell "no attachments" from "key missing". The relay path uses this
/// directly: caller-formed payloads are not held to the response invariant.
pub fn payload_to_post(user_id: &str, channel_id: &str, payload: WebhookPayload) -> EphemeralPost {
    let mut props = payload.props.unwrap_or_default();
    props.insert(
        "attachments".to_string(),
        Value::Array(payload.attachments.unwrap_or_default()),
    );

    EphemeralPost {
        user_id: user_id.to_string(),
        channel_id: channel_id.to_string(),
        message: payload.text,
        props,
    }
}

/// Translate an extension response into the ephemeral reply for its author.
/// A well-formed response carries non-empty text or non-empty attachments.
pub fn build_reply(
    author_id: &str,
    channel_id: &str,
    payload: WebhookPayload,
) -> Result<EphemeralPost, BridgeError> {
    let has_attachments = payload.attachments.as_ref().is_some_and(|a| !a.is_empty());
    if payload.text.is_empty() && !has_attachments {
        return Err(BridgeError::MalformedResponse(
            "empty text and no attachments".to_string(),
        ));
    }

    Ok(payload_to_post(author_id, channel_id, payload))
}

pub struct ExtensionBridge {
    client: reqwest::Client,
    config: ExtensionConfig,
}

impl ExtensionBridge {
    pub fn new(config: ExtensionConfig) -> anyhow::Result<Self> {
        // The extension call is synchronous from the message pipeline's point
        // of view; an unbounded wait would stall dispatch, so the client
        // carries an explicit timeout. Expiry surfaces as BridgeError::Call.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Forward a trigger-word message to the extension and translate the
    /// response into the ephemeral reply for the author.
    pub async fn call(
        &self,
        command: &TriggerCommand,
        author_id: &str,
        channel: &ChannelInfo,
    ) -> Result<EphemeralPost, BridgeError> {
        debug!("Forwarding trigger '{}' to extension", command.word);

        let form = [
            ("text", command.text.as_str()),
            ("token", self.config.token.as_str()),
            ("trigger_word", command.word.as_str()),
            ("user_id", author_id),
            ("channel_id", channel.id.as_str()),
            ("chnl_name", channel.name.as_str()),
            ("chnl_dname", channel.display_name.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| BridgeError::Call(anyhow::Error::new(e).context("Extension POST failed")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Call(anyhow::anyhow!(
                "Extension error ({}): {}",
                status,
                body
            )));
        }

        let payload: WebhookPayload = response
            .json()
            .await
            .map_err(|e| BridgeError::MalformedResponse(format!("undecodable body: {}", e)))?;

        build_reply(author_id, &channel.id, payload)
    }
}
