use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::diagnostics::{self, Diagnostics, Severity};
use super::events::{CommunityId, MemberId, RoleId};
use super::grant::{RoleGrantExecutor, RoleGrantOutcome};
use super::platform::Platform;
use super::settings::{CommunitySettings, SettingsCache};
use super::tracker::{InviteUsageTracker, UsageDelta};
use super::validation::censor_invite_code;
use crate::error::BotError;

/// What a usage delta says about a join, before anything is done about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    /// No invite use was observed.
    NoInvite,
    /// Exactly one invite was used and it has no role configured.
    Unconfigured { code: String },
    /// Exactly one invite was used and it maps to a role.
    Grant { code: String, role: RoleId },
    /// Several invites were used within one observation window.
    Ambiguous { codes: Vec<String> },
}

/// Decide what a join means given the published delta and the community's
/// settings. Pure: the same inputs always produce the same decision.
pub fn decide(delta: &UsageDelta, settings: &CommunitySettings) -> Attribution {
    let mut codes = delta.keys();
    match (codes.next(), codes.next()) {
        (None, _) => Attribution::NoInvite,
        (Some(code), None) => match settings.role_for(code) {
            Some(role) => Attribution::Grant {
                code: code.clone(),
                role,
            },
            None => Attribution::Unconfigured { code: code.clone() },
        },
        (Some(_), Some(_)) => Attribution::Ambiguous {
            codes: delta.keys().cloned().collect(),
        },
    }
}

/// What handling a join actually did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// The community is not registered.
    Untracked,
    /// The invite list couldn't be fetched.
    TrackingFailed,
    /// Automated accounts are never granted a role.
    BotAccount,
    NoInvite,
    Unconfigured { code: String },
    Ambiguous { codes: Vec<String> },
    /// The configured role no longer exists; the mapping was removed.
    StaleRole { code: String, role: RoleId },
    Granted {
        code: String,
        role: RoleId,
        outcome: RoleGrantOutcome,
    },
}

/// Orchestrates invite tracking, role lookup and role grants on member join.
pub struct MembershipAttributor {
    platform: Arc<dyn Platform>,
    settings: Arc<SettingsCache>,
    tracker: Arc<InviteUsageTracker>,
    executor: RoleGrantExecutor,
    diagnostics: Arc<Diagnostics>,
}

impl MembershipAttributor {
    pub fn new(
        platform: Arc<dyn Platform>,
        settings: Arc<SettingsCache>,
        tracker: Arc<InviteUsageTracker>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let executor = RoleGrantExecutor::new(platform.clone(), diagnostics.clone());
        Self {
            platform,
            settings,
            tracker,
            executor,
            diagnostics,
        }
    }

    pub async fn on_member_join(
        &self,
        community: CommunityId,
        member: MemberId,
        is_bot: bool,
    ) -> JoinOutcome {
        if !self.settings.contains(community) {
            debug!(%community, %member, "join in untracked community ignored");
            return JoinOutcome::Untracked;
        }

        // Always update, even for bots, so the next human join diffs
        // against a fresh snapshot.
        let delta = match self.tracker.update(community).await {
            Ok(delta) => delta,
            Err(e) => {
                let err = BotError::from(e);
                match &err {
                    BotError::TransientPlatform(_) | BotError::Permission(_) => {
                        info!(%community, %member, error = %err, "failed to fetch invites on join");
                    }
                    _ => error!(%community, %member, error = %err, "failed to fetch invites on join"),
                }
                self.diagnostics
                    .send(
                        community,
                        Severity::Error,
                        &diagnostics::tracking_failed(member, &err),
                    )
                    .await;
                return JoinOutcome::TrackingFailed;
            }
        };

        if is_bot {
            debug!(%community, %member, "joined member is a bot, no role granted");
            return JoinOutcome::BotAccount;
        }

        let Some(settings) = self.settings.get(community) else {
            return JoinOutcome::Untracked;
        };

        match decide(&delta, &settings) {
            Attribution::NoInvite => {
                warn!(%community, %member, "member joined but no invite use was observed");
                JoinOutcome::NoInvite
            }
            Attribution::Unconfigured { code } => {
                debug!(%community, %member, code = %code, "invite has no role configured");
                JoinOutcome::Unconfigured { code }
            }
            Attribution::Ambiguous { codes } => {
                info!(%community, %member, ?codes, "several invites used between observations");
                self.diagnostics
                    .send(
                        community,
                        Severity::Warning,
                        &diagnostics::ambiguous_join(member, &codes),
                    )
                    .await;
                JoinOutcome::Ambiguous { codes }
            }
            Attribution::Grant { code, role } => self.grant(community, member, code, role).await,
        }
    }

    async fn grant(
        &self,
        community: CommunityId,
        member: MemberId,
        code: String,
        role: RoleId,
    ) -> JoinOutcome {
        match self.platform.role_exists(community, role).await {
            Ok(false) => {
                self.remove_stale_role(community, &code, role).await;
                return JoinOutcome::StaleRole { code, role };
            }
            Ok(true) => {}
            Err(e) => {
                // The grant itself reports whatever is wrong.
                debug!(%community, %role, error = %e, "role lookup failed, attempting grant anyway");
            }
        }

        let reason = format!("Joined with invite {}", censor_invite_code(&code));
        let outcome = self.executor.grant(community, member, role, &reason).await;
        JoinOutcome::Granted {
            code,
            role,
            outcome,
        }
    }

    /// Remove `code -> role` if it is still configured. Sends a diagnostic
    /// only when this call performed the removal.
    pub async fn remove_stale_role(&self, community: CommunityId, code: &str, role: RoleId) -> bool {
        let removed = self
            .settings
            .mutate(community, |s| {
                if s.role_for(code) == Some(role) {
                    s.remove_invite_role(code);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if removed {
            info!(%community, code = %code, %role, "removed invite role pointing at a deleted role");
            self.diagnostics
                .send(
                    community,
                    Severity::Warning,
                    &diagnostics::stale_role_removed(code, role),
                )
                .await;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::ChannelId;
    use crate::engine::platform::PlatformError;
    use crate::engine::testing::FakePlatform;

    const C: CommunityId = CommunityId(1);
    const M: MemberId = MemberId(100);
    const R: RoleId = RoleId(42);

    fn delta(entries: &[(&str, u64)]) -> UsageDelta {
        entries.iter().map(|(c, u)| (c.to_string(), *u)).collect()
    }

    fn settings_with(code: &str, role: RoleId) -> CommunitySettings {
        let mut s = CommunitySettings::default();
        s.set_invite_role(code, role);
        s
    }

    struct Fixture {
        platform: Arc<FakePlatform>,
        settings: Arc<SettingsCache>,
        attributor: MembershipAttributor,
    }

    async fn fixture(settings: CommunitySettings, invites: &[(&str, u64)]) -> Fixture {
        let platform = Arc::new(FakePlatform::new());
        platform.set_system_channel(C, ChannelId(10));
        platform.add_role(C, R);
        platform.set_invites(C, invites);
        let cache = Arc::new(SettingsCache::new());
        cache.insert(C, settings, false);
        let tracker = Arc::new(InviteUsageTracker::new(platform.clone()));
        tracker.prime(C).await.unwrap();
        let diagnostics = Arc::new(Diagnostics::new(platform.clone(), cache.clone()));
        let attributor =
            MembershipAttributor::new(platform.clone(), cache.clone(), tracker, diagnostics);
        Fixture {
            platform,
            settings: cache,
            attributor,
        }
    }

    #[test]
    fn test_decide_empty_delta() {
        assert_eq!(
            decide(&delta(&[]), &settings_with("abc", R)),
            Attribution::NoInvite
        );
    }

    #[test]
    fn test_decide_single_configured_invite() {
        assert_eq!(
            decide(&delta(&[("abc", 1)]), &settings_with("abc", R)),
            Attribution::Grant {
                code: "abc".into(),
                role: R
            }
        );
    }

    #[test]
    fn test_decide_single_unconfigured_invite() {
        assert_eq!(
            decide(&delta(&[("xyz", 3)]), &settings_with("abc", R)),
            Attribution::Unconfigured { code: "xyz".into() }
        );
    }

    #[test]
    fn test_decide_ambiguous_even_when_configured() {
        let d = delta(&[("abc", 1), ("def", 1)]);
        let mut s = settings_with("abc", R);
        s.set_invite_role("def", R);
        assert_eq!(
            decide(&d, &s),
            Attribution::Ambiguous {
                codes: vec!["abc".into(), "def".into()]
            }
        );
    }

    #[test]
    fn test_decide_is_idempotent() {
        let s = settings_with("abc", R);
        for d in [
            delta(&[]),
            delta(&[("abc", 2)]),
            delta(&[("abc", 1), ("zzz", 4)]),
        ] {
            assert_eq!(decide(&d, &s), decide(&d, &s));
        }
    }

    #[tokio::test]
    async fn test_single_invite_grants_role() {
        let f = fixture(settings_with("abc123", R), &[("abc123", 5)]).await;
        f.platform.set_invites(C, &[("abc123", 6)]);

        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert_eq!(
            outcome,
            JoinOutcome::Granted {
                code: "abc123".into(),
                role: R,
                outcome: RoleGrantOutcome::Granted
            }
        );
        let grants = f.platform.grants();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].member, M);
        assert_eq!(grants[0].reason, "Joined with invite abc•••");
        assert!(f.platform.messages().is_empty());
    }

    #[tokio::test]
    async fn test_two_invites_grant_nothing_and_warn_once() {
        let mut s = settings_with("A", R);
        s.set_invite_role("B", R);
        let f = fixture(s, &[("A", 5), ("B", 2)]).await;
        f.platform.set_invites(C, &[("A", 6), ("B", 3)]);

        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert!(matches!(outcome, JoinOutcome::Ambiguous { .. }));
        assert!(f.platform.grants().is_empty());
        assert_eq!(f.platform.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_invite_is_noop() {
        let f = fixture(CommunitySettings::default(), &[("abc", 0)]).await;
        f.platform.set_invites(C, &[("abc", 1)]);
        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert_eq!(outcome, JoinOutcome::Unconfigured { code: "abc".into() });
        assert!(f.platform.grants().is_empty());
        assert!(f.platform.messages().is_empty());
    }

    #[tokio::test]
    async fn test_no_invite_delta_is_noop() {
        let f = fixture(settings_with("abc", R), &[("abc", 1)]).await;
        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert_eq!(outcome, JoinOutcome::NoInvite);
        assert!(f.platform.grants().is_empty());
        assert!(f.platform.messages().is_empty());
    }

    #[tokio::test]
    async fn test_bot_account_never_granted_but_tracker_advances() {
        let f = fixture(settings_with("abc", R), &[("abc", 1)]).await;
        f.platform.set_invites(C, &[("abc", 2)]);
        let outcome = f.attributor.on_member_join(C, M, true).await;
        assert_eq!(outcome, JoinOutcome::BotAccount);
        assert!(f.platform.grants().is_empty());

        // The use was consumed by the bot's update; a later human join with
        // no new use sees an empty delta.
        let outcome = f.attributor.on_member_join(C, MemberId(200), false).await;
        assert_eq!(outcome, JoinOutcome::NoInvite);
    }

    #[tokio::test]
    async fn test_stale_role_removed_once_with_one_diagnostic() {
        let f = fixture(settings_with("abc123", R), &[("abc123", 0)]).await;
        f.platform.delete_role(C, R);
        f.platform.set_invites(C, &[("abc123", 1)]);

        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert_eq!(
            outcome,
            JoinOutcome::StaleRole {
                code: "abc123".into(),
                role: R
            }
        );
        assert_eq!(f.settings.role_for(C, "abc123"), None);
        assert!(f.settings.is_dirty(C));
        assert_eq!(f.platform.messages().len(), 1);

        // Second removal attempt is a no-op.
        assert!(!f.attributor.remove_stale_role(C, "abc123", R).await);
        assert_eq!(f.platform.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_grant_failure_reported() {
        let f = fixture(settings_with("abc", R), &[("abc", 0)]).await;
        f.platform.fail_grant(R, PlatformError::RoleHierarchy);
        f.platform.set_invites(C, &[("abc", 1)]);
        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert_eq!(
            outcome,
            JoinOutcome::Granted {
                code: "abc".into(),
                role: R,
                outcome: RoleGrantOutcome::HierarchyViolation
            }
        );
        assert_eq!(f.platform.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_and_grants_nothing() {
        let f = fixture(settings_with("abc", R), &[("abc", 0)]).await;
        f.platform.fail_fetch(C, PlatformError::RateLimited);
        let outcome = f.attributor.on_member_join(C, M, false).await;
        assert_eq!(outcome, JoinOutcome::TrackingFailed);
        assert!(f.platform.grants().is_empty());
        assert_eq!(f.platform.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_untracked_community() {
        let f = fixture(settings_with("abc", R), &[("abc", 0)]).await;
        let outcome = f
            .attributor
            .on_member_join(CommunityId(999), M, false)
            .await;
        assert_eq!(outcome, JoinOutcome::Untracked);
        assert!(f.platform.grants().is_empty());
    }
}
