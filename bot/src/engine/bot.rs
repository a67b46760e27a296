use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::attributor::{JoinOutcome, MembershipAttributor};
use super::commands::{Command, CommandResponse, CommandService};
use super::diagnostics::Diagnostics;
use super::events::{CommunityId, MemberId, PlatformEvent, RoleId};
use super::platform::Platform;
use super::scheduler::{FlushReport, PersistenceScheduler};
use super::settings::{CommunitySettings, SettingsCache};
use super::tracker::InviteUsageTracker;
use crate::db::store::SettingsStore;
use crate::error::BotResult;

/// Mappings removed by a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub missing_roles: Vec<String>,
    pub missing_invites: Vec<String>,
}

/// The owned registry of joined communities and the entry point for
/// platform events and admin commands.
pub struct InviteRolesEngine {
    platform: Arc<dyn Platform>,
    settings: Arc<SettingsCache>,
    tracker: Arc<InviteUsageTracker>,
    scheduler: Arc<PersistenceScheduler>,
    attributor: MembershipAttributor,
    commands: CommandService,
}

impl InviteRolesEngine {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn SettingsStore>,
        flush_interval: Duration,
    ) -> Self {
        let settings = Arc::new(SettingsCache::new());
        let tracker = Arc::new(InviteUsageTracker::new(platform.clone()));
        let scheduler = Arc::new(PersistenceScheduler::new(
            settings.clone(),
            store,
            flush_interval,
        ));
        let diagnostics = Arc::new(Diagnostics::new(platform.clone(), settings.clone()));
        let attributor = MembershipAttributor::new(
            platform.clone(),
            settings.clone(),
            tracker.clone(),
            diagnostics,
        );
        let commands = CommandService::new(platform.clone(), settings.clone());
        Self {
            platform,
            settings,
            tracker,
            scheduler,
            attributor,
            commands,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsCache> {
        &self.settings
    }

    pub fn scheduler(&self) -> &Arc<PersistenceScheduler> {
        &self.scheduler
    }

    pub fn tracker(&self) -> &Arc<InviteUsageTracker> {
        &self.tracker
    }

    // ── Event dispatch ──────────────────────────────────────────────

    /// Handle one platform event. Failures are logged and never propagate:
    /// one community's trouble must not affect the others.
    pub async fn handle_event(&self, event: PlatformEvent) {
        let community = event.community();
        let result = match event {
            PlatformEvent::MemberJoined {
                community,
                member,
                is_bot,
            } => {
                self.on_member_joined(community, member, is_bot).await;
                Ok(())
            }
            PlatformEvent::CommunityJoined { community } => {
                self.on_community_joined(community).await.map(|_| ())
            }
            PlatformEvent::CommunityLeft { community } => self.on_community_left(community).await,
            PlatformEvent::RoleDeleted { community, role } => {
                self.on_role_deleted(community, role);
                Ok(())
            }
            PlatformEvent::InviteDeleted { community, code } => {
                self.on_invite_deleted(community, &code);
                Ok(())
            }
        };
        if let Err(e) = result {
            error!(%community, error = %e, "failed to handle platform event");
        }
    }

    pub async fn execute_command(&self, community: CommunityId, command: Command) -> CommandResponse {
        self.commands.execute(community, command).await
    }

    // ── Community lifecycle ─────────────────────────────────────────

    /// Register a community: load its stored settings or create defaults,
    /// take the invite baseline, and drop mappings that went stale while
    /// the bot was away. Returns true on first contact.
    pub async fn on_community_joined(&self, community: CommunityId) -> BotResult<bool> {
        if self.settings.contains(community) {
            debug!(%community, "community already registered");
            return Ok(false);
        }

        let first_contact = match self.scheduler.load(community).await? {
            Some(stored) => {
                self.settings.insert(community, stored, false);
                info!(%community, "joined community again, settings loaded");
                false
            }
            None => {
                self.settings
                    .insert(community, CommunitySettings::default(), true);
                info!(%community, "joined community for the first time");
                if let Err(e) = self.scheduler.write_through(community).await {
                    // Stays dirty; the next tick retries.
                    error!(%community, error = %e, "failed to persist new community settings");
                }
                true
            }
        };

        match self.tracker.prime(community).await {
            Ok(()) => {
                let report = self.reconcile(community).await;
                if !report.missing_roles.is_empty() || !report.missing_invites.is_empty() {
                    info!(
                        %community,
                        roles = report.missing_roles.len(),
                        invites = report.missing_invites.len(),
                        "removed stale invite roles"
                    );
                }
            }
            Err(e) => {
                warn!(%community, error = %e, "failed to take invite baseline");
            }
        }

        Ok(first_contact)
    }

    /// Forget a community and delete its stored settings.
    pub async fn on_community_left(&self, community: CommunityId) -> BotResult<()> {
        self.tracker.forget(community);
        if self.scheduler.evict(community).await? {
            info!(%community, "left community, settings deleted");
        }
        Ok(())
    }

    /// Remove mappings whose role or invite no longer exists. Uses the
    /// tracker's last snapshot for the invite list.
    pub async fn reconcile(&self, community: CommunityId) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(settings) = self.settings.get(community) else {
            return report;
        };
        let snapshot = self.tracker.snapshot(community).await;

        for (code, role) in settings.invite_roles {
            if !snapshot.contains_key(&code) {
                let removed = self
                    .settings
                    .mutate(community, |s| s.remove_invite_role(&code).is_some())
                    .unwrap_or(false);
                if removed {
                    debug!(%community, code = %code, "invite role removed, invite no longer exists");
                    report.missing_invites.push(code);
                }
                continue;
            }
            match self.platform.role_exists(community, role).await {
                Ok(true) => {}
                Ok(false) => {
                    if self.attributor.remove_stale_role(community, &code, role).await {
                        report.missing_roles.push(code);
                    }
                }
                Err(e) => {
                    debug!(%community, %role, error = %e, "role lookup failed during reconcile");
                }
            }
        }
        report
    }

    // ── Platform events ─────────────────────────────────────────────

    pub async fn on_member_joined(
        &self,
        community: CommunityId,
        member: MemberId,
        is_bot: bool,
    ) -> JoinOutcome {
        self.attributor.on_member_join(community, member, is_bot).await
    }

    /// Drop every mapping that grants the deleted role.
    pub fn on_role_deleted(&self, community: CommunityId, role: RoleId) -> Vec<String> {
        let removed = self
            .settings
            .mutate(community, |s| s.remove_role(role))
            .unwrap_or_default();
        if removed.is_empty() {
            debug!(%community, %role, "no invite roles affected by role deletion");
        } else {
            info!(%community, %role, codes = removed.len(), "invite roles removed with deleted role");
        }
        removed
    }

    pub fn on_invite_deleted(&self, community: CommunityId, code: &str) -> bool {
        let removed = self
            .settings
            .mutate(community, |s| s.remove_invite_role(code))
            .flatten();
        match removed {
            Some(role) => {
                info!(%community, code = %code, %role, "invite role removed with deleted invite");
                true
            }
            None => false,
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Flush everything synchronously. Call after the scheduler loop stops.
    pub async fn shutdown(&self) -> FlushReport {
        info!(communities = self.settings.len(), "shutting down, flushing settings");
        self.scheduler.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::ChannelId;
    use crate::engine::platform::PlatformError;
    use crate::engine::scheduler::DEFAULT_FLUSH_INTERVAL;
    use crate::engine::testing::{FakePlatform, FakeStore};

    const C: CommunityId = CommunityId(1);
    const R: RoleId = RoleId(42);

    fn setup() -> (Arc<FakePlatform>, Arc<FakeStore>, InviteRolesEngine) {
        let platform = Arc::new(FakePlatform::new());
        platform.set_system_channel(C, ChannelId(10));
        platform.add_role(C, R);
        platform.set_invites(C, &[("abc123", 0)]);
        let store = Arc::new(FakeStore::new());
        let engine = InviteRolesEngine::new(platform.clone(), store.clone(), DEFAULT_FLUSH_INTERVAL);
        (platform, store, engine)
    }

    #[tokio::test]
    async fn test_first_contact_writes_through() {
        let (_, store, engine) = setup();
        assert!(engine.on_community_joined(C).await.unwrap());
        assert_eq!(store.record(C), Some(CommunitySettings::default()));
        assert!(!engine.settings().is_dirty(C));
        assert!(engine.tracker().is_tracking(C));
    }

    #[tokio::test]
    async fn test_rejoin_loads_stored_settings() {
        let (_, store, engine) = setup();
        let mut stored = CommunitySettings::default();
        stored.set_invite_role("abc123", R);
        stored.warnings_enabled = false;
        store.insert_record(C, stored.clone());

        assert!(!engine.on_community_joined(C).await.unwrap());
        assert_eq!(engine.settings().get(C), Some(stored));
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_join_is_noop() {
        let (_, store, engine) = setup();
        engine.on_community_joined(C).await.unwrap();
        assert!(!engine.on_community_joined(C).await.unwrap());
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_through_leaves_dirty() {
        let (_, store, engine) = setup();
        store.fail_saves(C, true);
        assert!(engine.on_community_joined(C).await.unwrap());
        assert!(engine.settings().is_dirty(C));

        store.fail_saves(C, false);
        engine.scheduler().flush_dirty().await;
        assert!(store.record(C).is_some());
    }

    #[tokio::test]
    async fn test_leave_deletes_everything() {
        let (_, store, engine) = setup();
        engine.on_community_joined(C).await.unwrap();
        engine.on_community_left(C).await.unwrap();
        assert!(!engine.settings().contains(C));
        assert!(!engine.tracker().is_tracking(C));
        assert!(store.record(C).is_none());
    }

    #[tokio::test]
    async fn test_leave_with_failed_delete_does_not_restore_old_settings() {
        let (_, store, engine) = setup();
        engine.on_community_joined(C).await.unwrap();
        engine.settings().mutate(C, |s| s.set_invite_role("abc123", R));
        engine.scheduler().flush_dirty().await;

        store.fail_deletes(C, true);
        assert!(engine.on_community_left(C).await.is_err());
        assert!(!engine.settings().contains(C));
        assert!(store.record(C).is_some());

        // Rejoining before the retry starts from defaults, not the old record.
        assert!(engine.on_community_joined(C).await.unwrap());
        assert_eq!(engine.settings().role_for(C, "abc123"), None);
        assert_eq!(store.record(C), Some(CommunitySettings::default()));
    }

    #[tokio::test]
    async fn test_reconcile_on_join_removes_stale_mappings() {
        let (platform, store, engine) = setup();
        let mut stored = CommunitySettings::default();
        stored.set_invite_role("abc123", RoleId(7));
        stored.set_invite_role("gone", R);
        store.insert_record(C, stored);

        engine.on_community_joined(C).await.unwrap();
        let settings = engine.settings().get(C).unwrap();
        assert!(settings.invite_roles.is_empty());
        assert!(engine.settings().is_dirty(C));
        // Only the missing role produces a diagnostic.
        assert_eq!(platform.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_join_without_baseline_skips_reconcile() {
        let (platform, store, engine) = setup();
        let mut stored = CommunitySettings::default();
        stored.set_invite_role("abc123", R);
        store.insert_record(C, stored);
        platform.fail_fetch(C, PlatformError::Timeout);

        engine.on_community_joined(C).await.unwrap();
        assert_eq!(engine.settings().role_for(C, "abc123"), Some(R));
    }

    #[tokio::test]
    async fn test_role_deleted_removes_mapping_once() {
        let (_, _, engine) = setup();
        engine.on_community_joined(C).await.unwrap();
        engine
            .execute_command(
                C,
                Command::SetInviteRole {
                    code: "abc123".into(),
                    role: R,
                },
            )
            .await;

        assert_eq!(engine.on_role_deleted(C, R), vec!["abc123".to_string()]);
        assert!(engine.on_role_deleted(C, R).is_empty());
        let response = engine
            .execute_command(C, Command::GetInviteRole { code: "abc123".into() })
            .await;
        assert!(response.ok);
        assert!(response.message.contains("not set"));
    }

    #[tokio::test]
    async fn test_invite_deleted_removes_mapping() {
        let (_, _, engine) = setup();
        engine.on_community_joined(C).await.unwrap();
        engine.settings().mutate(C, |s| s.set_invite_role("abc123", R));
        assert!(engine.on_invite_deleted(C, "abc123"));
        assert!(!engine.on_invite_deleted(C, "abc123"));
    }

    #[tokio::test]
    async fn test_handle_event_dispatch() {
        let (platform, _, engine) = setup();
        engine
            .handle_event(PlatformEvent::CommunityJoined { community: C })
            .await;
        engine.settings().mutate(C, |s| s.set_invite_role("abc123", R));
        platform.set_invites(C, &[("abc123", 1)]);
        engine
            .handle_event(PlatformEvent::MemberJoined {
                community: C,
                member: MemberId(5),
                is_bot: false,
            })
            .await;
        assert_eq!(platform.grants().len(), 1);

        engine
            .handle_event(PlatformEvent::CommunityLeft { community: C })
            .await;
        assert!(engine.settings().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_everything() {
        let (_, store, engine) = setup();
        engine.on_community_joined(C).await.unwrap();
        engine.settings().mutate(C, |s| s.warnings_enabled = false);
        let report = engine.shutdown().await;
        assert_eq!(report.flushed, 1);
        assert!(!store.record(C).unwrap().warnings_enabled);
    }
}
