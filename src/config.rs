use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    pub platform: PlatformConfig,
    pub extension: ExtensionConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default = "default_command_config")]
    pub commands: CommandConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    /// Base URL of the chat platform's REST API, e.g. "https://chat.example.com".
    pub base_url: String,
    /// Bot access token used for regular platform calls.
    pub bot_token: String,
    /// Administrative credentials, used only to add users to teams during a
    /// directory sync. A fresh session is acquired per sync call.
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtensionConfig {
    /// Endpoint of the external workflow service.
    pub url: String,
    /// Shared secret sent with every extension request.
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriggerConfig {
    /// First-token values that route a message to the extension. Matched
    /// case-sensitively.
    #[serde(default)]
    pub words: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandConfig {
    /// Command name -> action, for `#<command> <module> [id]` messages.
    #[serde(default = "default_command_table")]
    pub table: HashMap<String, String>,
    /// Name of the event published to the author's sessions on a match.
    #[serde(default = "default_event_name")]
    pub event_name: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8065".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_event_name() -> String {
    "workflow_command".to_string()
}

fn default_command_table() -> HashMap<String, String> {
    ["open", "create", "edit", "list"]
        .iter()
        .map(|c| (c.to_string(), c.to_string()))
        .collect()
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind_addr: default_bind_addr(),
    }
}

fn default_command_config() -> CommandConfig {
    CommandConfig {
        table: default_command_table(),
        event_name: default_event_name(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
