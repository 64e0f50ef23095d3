use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::PlatformConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Fields for an account that does not exist yet.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamInfo {
    pub id: String,
    pub name: String,
}

/// A post delivered only to one user's sessions, never persisted as a
/// channel message.
#[derive(Debug, Clone, Serialize)]
pub struct EphemeralPost {
    pub user_id: String,
    pub channel_id: String,
    pub message: String,
    pub props: serde_json::Map<String, Value>,
}

/// Chat-platform operations used by the bridge. Kept behind a trait so the
/// dispatch and sync logic can run against an in-memory fake in tests.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn get_channel(&self, channel_id: &str) -> Result<ChannelInfo>;
    async fn send_ephemeral(&self, post: &EphemeralPost) -> Result<()>;
    /// Publish a named event to a single user's live sessions.
    async fn publish_event(&self, event: &str, user_id: &str, payload: &Value) -> Result<()>;
    /// `Ok(None)` means the account does not exist; `Err` is a transport or
    /// provider failure.
    async fn find_user_by_username(&self, username: &str) -> Result<Option<PlatformUser>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<PlatformUser>>;
    async fn create_user(&self, user: &NewUser) -> Result<PlatformUser>;
    async fn get_teams(&self) -> Result<Vec<TeamInfo>>;
    /// Acquire an administrative session for the duration of one sync call.
    async fn admin_login(&self) -> Result<Box<dyn AdminSession>>;
}

/// Narrowly-scoped elevated credentials: only team-membership additions,
/// discarded when the sync call ends.
#[async_trait]
pub trait AdminSession: Send + Sync {
    /// Idempotent: adding a member that is already present succeeds.
    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<()>;
}

pub struct RestPlatform {
    client: reqwest::Client,
    config: PlatformConfig,
}

impl RestPlatform {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_user(&self, path: &str) -> Result<Option<PlatformUser>> {
        let response = self
            .client
            .get(self.api_url(path))
            .bearer_auth(&self.config.bot_token)
            .send()
            .await
            .with_context(|| format!("Platform request failed: {}", path))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Platform error ({}) on {}: {}", status, path, body);
        }

        let user = response
            .json()
            .await
            .with_context(|| format!("Failed to parse user from {}", path))?;
        Ok(Some(user))
    }
}

#[async_trait]
impl Platform for RestPlatform {
    async fn get_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        let url = self.api_url(&format!("/channels/{}", channel_id));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.bot_token)
            .send()
            .await
            .context("Channel lookup failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Channel lookup error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse channel")
    }

    async fn send_ephemeral(&self, post: &EphemeralPost) -> Result<()> {
        debug!("Sending ephemeral post to user {}", post.user_id);

        let body = serde_json::json!({
            "user_id": post.user_id,
            "post": {
                "channel_id": post.channel_id,
                "message": post.message,
                "props": post.props,
            },
        });

        let response = self
            .client
            .post(self.api_url("/posts/ephemeral"))
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await
            .context("Ephemeral post request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ephemeral post error ({}): {}", status, body);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &str, user_id: &str, payload: &Value) -> Result<()> {
        let body = serde_json::json!({
            "event": event,
            "user_id": user_id,
            "data": payload,
        });

        let response = self
            .client
            .post(self.api_url("/events"))
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await
            .context("Event publish request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Event publish error ({}): {}", status, body);
        }

        Ok(())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<PlatformUser>> {
        self.get_user(&format!("/users/username/{}", username)).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<PlatformUser>> {
        self.get_user(&format!("/users/email/{}", email)).await
    }

    async fn create_user(&self, user: &NewUser) -> Result<PlatformUser> {
        let response = self
            .client
            .post(self.api_url("/users"))
            .bearer_auth(&self.config.bot_token)
            .json(user)
            .send()
            .await
            .context("User creation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("User creation error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse created user")
    }

    async fn get_teams(&self) -> Result<Vec<TeamInfo>> {
        let response = self
            .client
            .get(self.api_url("/teams"))
            .bearer_auth(&self.config.bot_token)
            .send()
            .await
            .context("Team enumeration failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Team enumeration error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse teams")
    }

    async fn admin_login(&self) -> Result<Box<dyn AdminSession>> {
        let body = serde_json::json!({
            "login_id": self.config.admin_username,
            "password": self.config.admin_password,
        });

        let response = self
            .client
            .post(self.api_url("/users/login"))
            .json(&body)
            .send()
            .await
            .context("Admin login request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Admin login error ({}): {}", status, body);
        }

        let token = response
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .context("Admin login response carried no session token")?
            .to_string();

        Ok(Box::new(RestAdminSession {
            client: self.client.clone(),
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
            token,
        }))
    }
}

struct RestAdminSession {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[async_trait]
impl AdminSession for RestAdminSession {
    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<()> {
        let url = format!("{}/api/v4/teams/{}/members", self.base_url, team_id);
        let body = serde_json::json!({
            "team_id": team_id,
            "user_id": user_id,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Membership request failed for team {}", team_id))?;

        let status = response.status();
        // The platform reports an existing membership as a conflict; that is
        // a success for reconciliation purposes.
        if status == StatusCode::CONFLICT {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Membership error ({}) for team {}: {}", status, team_id, body);
        }

        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory platform for exercising dispatch and sync without a server.
    #[derive(Default)]
    pub struct FakePlatform {
        pub channel: Option<ChannelInfo>,
        pub users: Mutex<Vec<PlatformUser>>,
        pub created: Mutex<Vec<NewUser>>,
        pub teams: Vec<TeamInfo>,
        /// Team ids whose membership additions fail.
        pub failing_teams: HashSet<String>,
        pub fail_admin_login: bool,
        pub fail_user_lookups: bool,
        pub fail_create: bool,
        pub fail_publish: bool,
        pub memberships: Arc<Mutex<Vec<(String, String)>>>,
        pub ephemeral: Mutex<Vec<EphemeralPost>>,
        pub events: Mutex<Vec<(String, String, Value)>>,
    }

    impl FakePlatform {
        pub fn with_channel() -> Self {
            Self {
                channel: Some(ChannelInfo {
                    id: "ch1".to_string(),
                    name: "town-square".to_string(),
                    display_name: "Town Square".to_string(),
                }),
                ..Self::default()
            }
        }

        pub fn add_user(&self, id: &str, username: &str, email: &str) {
            self.users.lock().unwrap().push(PlatformUser {
                id: id.to_string(),
                username: username.to_string(),
                email: email.to_string(),
                first_name: String::new(),
                last_name: String::new(),
            });
        }

        pub fn add_team(&mut self, id: &str, name: &str) {
            self.teams.push(TeamInfo {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
    }

    struct FakeAdminSession {
        failing_teams: HashSet<String>,
        memberships: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl AdminSession for FakeAdminSession {
        async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<()> {
            if self.failing_teams.contains(team_id) {
                anyhow::bail!("membership rejected for team {}", team_id);
            }
            let mut memberships = self.memberships.lock().unwrap();
            let entry = (team_id.to_string(), user_id.to_string());
            // Idempotent: an existing membership is a successful no-op.
            if !memberships.contains(&entry) {
                memberships.push(entry);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Platform for FakePlatform {
        async fn get_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
            self.channel
                .clone()
                .filter(|c| c.id == channel_id)
                .ok_or_else(|| anyhow::anyhow!("no such channel: {}", channel_id))
        }

        async fn send_ephemeral(&self, post: &EphemeralPost) -> Result<()> {
            self.ephemeral.lock().unwrap().push(post.clone());
            Ok(())
        }

        async fn publish_event(&self, event: &str, user_id: &str, payload: &Value) -> Result<()> {
            if self.fail_publish {
                anyhow::bail!("session gone");
            }
            self.events.lock().unwrap().push((
                event.to_string(),
                user_id.to_string(),
                payload.clone(),
            ));
            Ok(())
        }

        async fn find_user_by_username(&self, username: &str) -> Result<Option<PlatformUser>> {
            if self.fail_user_lookups {
                anyhow::bail!("directory unavailable");
            }
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.username == username)
                .cloned())
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<PlatformUser>> {
            if self.fail_user_lookups {
                anyhow::bail!("directory unavailable");
            }
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn create_user(&self, user: &NewUser) -> Result<PlatformUser> {
            if self.fail_create {
                anyhow::bail!("creation rejected");
            }
            self.created.lock().unwrap().push(user.clone());
            let created = PlatformUser {
                id: format!("created-{}", self.created.lock().unwrap().len()),
                username: user.username.clone(),
                email: user.email.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
            };
            self.users.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn get_teams(&self) -> Result<Vec<TeamInfo>> {
            Ok(self.teams.clone())
        }

        async fn admin_login(&self) -> Result<Box<dyn AdminSession>> {
            if self.fail_admin_login {
                anyhow::bail!("invalid admin credentials");
            }
            Ok(Box::new(FakeAdminSession {
                failing_teams: self.failing_teams.clone(),
                memberships: Arc::clone(&self.memberships),
            }))
        }
    }
}
