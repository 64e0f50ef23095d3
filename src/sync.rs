use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::platform::{NewUser, Platform, PlatformUser};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A directory lookup failed at the transport/provider level. Distinct
    /// from "account not found", which falls through to the next lookup.
    #[error("directory lookup failed: {0:#}")]
    Lookup(#[source] anyhow::Error),
    /// The account exists under neither lookup key and creation failed.
    /// The only condition that aborts a sync.
    #[error("account creation failed: {0:#}")]
    Creation(#[source] anyhow::Error),
}

/// External directory's representation of a person.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalUser {
    pub user_name: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl ExternalUser {
    /// Pure, total mapping into the platform's account shape.
    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            username: self.user_name.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }

    /// Canonical mapping of a resolved platform account back into the
    /// external record's shape.
    pub fn from_platform_user(user: &PlatformUser) -> Self {
        Self {
            user_name: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

/// One team's membership attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    Added,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TeamOutcome {
    pub team_id: String,
    pub team_name: String,
    pub membership: Membership,
}

/// Result of one sync call. The resolved user is returned even when team
/// reconciliation partly or wholly failed.
#[derive(Debug)]
pub struct SyncOutcome {
    pub user: ExternalUser,
    pub teams: Vec<TeamOutcome>,
    /// Set when the team loop could not run at all (admin login or team
    /// enumeration failed). Non-fatal.
    pub team_error: Option<String>,
}

impl SyncOutcome {
    /// Non-fatal partial-reconciliation report: which teams, if any, failed.
    pub fn partial_failure(&self) -> Option<String> {
        if let Some(err) = &self.team_error {
            return Some(err.clone());
        }
        let failed: Vec<String> = self
            .teams
            .iter()
            .filter_map(|t| match &t.membership {
                Membership::Failed(reason) => {
                    Some(format!("{} ({}): {}", t.team_name, t.team_id, reason))
                }
                Membership::Added => None,
            })
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(failed.join("; "))
        }
    }
}

/// Find-or-create the platform account for an external record, then
/// reconcile team membership across every existing team.
///
/// Resolution order: username, then email, then creation. After resolution
/// the team loop always runs; each team is handled independently and a
/// failure on one never aborts the rest.
pub async fn reconcile(
    platform: &dyn Platform,
    record: &ExternalUser,
) -> Result<SyncOutcome, SyncError> {
    let resolved = resolve_account(platform, record).await?;

    info!(
        "Synced directory user '{}' to account {}",
        record.user_name, resolved.id
    );

    let mut outcome = SyncOutcome {
        user: ExternalUser::from_platform_user(&resolved),
        teams: Vec::new(),
        team_error: None,
    };

    reconcile_teams(platform, &resolved.id, &mut outcome).await;

    if let Some(partial) = outcome.partial_failure() {
        warn!(
            "Partial team reconciliation for '{}': {}",
            resolved.username, partial
        );
    }

    Ok(outcome)
}

async fn resolve_account(
    platform: &dyn Platform,
    record: &ExternalUser,
) -> Result<PlatformUser, SyncError> {
    if let Some(user) = platform
        .find_user_by_username(&record.user_name)
        .await
        .map_err(SyncError::Lookup)?
    {
        return Ok(user);
    }

    if let Some(user) = platform
        .find_user_by_email(&record.email)
        .await
        .map_err(SyncError::Lookup)?
    {
        return Ok(user);
    }

    platform
        .create_user(&record.to_new_user())
        .await
        .map_err(SyncError::Creation)
}

/// Best-effort: re-authenticate with admin credentials for the duration of
/// this call, then attempt membership on every team, accumulating per-team
/// outcomes instead of short-circuiting.
async fn reconcile_teams(platform: &dyn Platform, user_id: &str, outcome: &mut SyncOutcome) {
    let admin = match platform.admin_login().await {
        Ok(session) => session,
        Err(e) => {
            outcome.team_error = Some(format!("admin login failed: {:#}", e));
            return;
        }
    };

    let teams = match platform.get_teams().await {
        Ok(teams) => teams,
        Err(e) => {
            outcome.team_error = Some(format!("team enumeration failed: {:#}", e));
            return;
        }
    };

    for team in teams {
        let membership = match admin.add_team_member(&team.id, user_id).await {
            Ok(()) => Membership::Added,
            Err(e) => Membership::Failed(format!("{:#}", e)),
        };
        outcome.teams.push(TeamOutcome {
            team_id: team.id,
            team_name: team.name,
            membership,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FakePlatform;

    fn record() -> ExternalUser {
        ExternalUser {
            user_name: "jdoe".to_string(),
            email: "jdoe@example.com".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
        }
    }

    #[tokio::test]
    async fn test_existing_username_is_not_duplicated() {
        let mut platform = FakePlatform::default();
        platform.add_team("t1", "engineering");
        platform.add_user("u1", "jdoe", "old-address@example.com");

        let outcome = reconcile(&platform, &record()).await.unwrap();

        assert!(platform.created.lock().unwrap().is_empty());
        // Canonical mapping reflects the resolved account, not the request.
        assert_eq!(outcome.user.email, "old-address@example.com");
        // Membership was still attempted on every team.
        assert_eq!(
            *platform.memberships.lock().unwrap(),
            vec![("t1".to_string(), "u1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_email_fallback_when_username_differs() {
        let platform = FakePlatform::default();
        platform.add_user("u2", "jane.doe", "jdoe@example.com");

        let outcome = reconcile(&platform, &record()).await.unwrap();

        assert!(platform.created.lock().unwrap().is_empty());
        assert_eq!(outcome.user.user_name, "jane.doe");
    }

    #[tokio::test]
    async fn test_unknown_user_is_created_and_joined() {
        let mut platform = FakePlatform::default();
        platform.add_team("t1", "engineering");
        platform.add_team("t2", "sales");

        let outcome = reconcile(&platform, &record()).await.unwrap();

        assert_eq!(platform.created.lock().unwrap().len(), 1);
        assert_eq!(outcome.user.user_name, "jdoe");
        assert_eq!(outcome.teams.len(), 2);
        assert!(outcome.partial_failure().is_none());
        assert_eq!(platform.memberships.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_one_failing_team_does_not_abort_the_loop() {
        let mut platform = FakePlatform::default();
        platform.add_team("t1", "engineering");
        platform.add_team("t2", "sales");
        platform.failing_teams.insert("t1".to_string());
        platform.add_user("u1", "jdoe", "jdoe@example.com");

        let outcome = reconcile(&platform, &record()).await.unwrap();

        // The resolved user is reported alongside the partial failure.
        assert_eq!(outcome.user.user_name, "jdoe");
        let partial = outcome.partial_failure().unwrap();
        assert!(partial.contains("engineering"));
        assert_eq!(
            outcome
                .teams
                .iter()
                .filter(|t| t.membership == Membership::Added)
                .count(),
            1
        );
        assert_eq!(
            *platform.memberships.lock().unwrap(),
            vec![("t2".to_string(), "u1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_admin_login_failure_is_non_fatal() {
        let mut platform = FakePlatform::default();
        platform.fail_admin_login = true;
        platform.add_user("u1", "jdoe", "jdoe@example.com");

        let outcome = reconcile(&platform, &record()).await.unwrap();

        assert_eq!(outcome.user.user_name, "jdoe");
        assert!(outcome.partial_failure().unwrap().contains("admin login"));
    }

    #[tokio::test]
    async fn test_lookup_transport_failure_aborts() {
        let platform = FakePlatform {
            fail_user_lookups: true,
            ..FakePlatform::default()
        };

        let err = reconcile(&platform, &record()).await.unwrap_err();
        assert!(matches!(err, SyncError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_creation_failure_aborts() {
        let platform = FakePlatform {
            fail_create: true,
            ..FakePlatform::default()
        };

        let err = reconcile(&platform, &record()).await.unwrap_err();
        assert!(matches!(err, SyncError::Creation(_)));
    }

    #[tokio::test]
    async fn test_membership_is_idempotent() {
        let mut platform = FakePlatform::default();
        platform.add_team("t1", "engineering");
        platform.add_user("u1", "jdoe", "jdoe@example.com");

        reconcile(&platform, &record()).await.unwrap();
        let outcome = reconcile(&platform, &record()).await.unwrap();

        assert!(outcome.partial_failure().is_none());
        assert_eq!(platform.memberships.lock().unwrap().len(), 1);
    }
}
