//! Scripted in-memory platform and settings store for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::events::{ChannelId, CommunityId, MemberId, RoleId};
use super::platform::{InviteUse, Platform, PlatformError};
use super::settings::CommunitySettings;
use crate::db::store::SettingsStore;
use crate::error::{BotError, BotResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGrant {
    pub community: CommunityId,
    pub member: MemberId,
    pub role: RoleId,
    pub reason: String,
}

#[derive(Default)]
struct State {
    invites: HashMap<CommunityId, Vec<InviteUse>>,
    fetch_failures: HashMap<CommunityId, PlatformError>,
    fetch_calls: usize,
    roles: HashSet<(CommunityId, RoleId)>,
    grant_failures: HashMap<RoleId, PlatformError>,
    grants: Vec<RecordedGrant>,
    system_channels: HashMap<CommunityId, ChannelId>,
    messages: Vec<(ChannelId, String)>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a community's invite list. Clears any scripted fetch failure.
    pub fn set_invites(&self, community: CommunityId, invites: &[(&str, u64)]) {
        let mut state = self.state.lock().unwrap();
        state.fetch_failures.remove(&community);
        state.invites.insert(
            community,
            invites
                .iter()
                .map(|(code, uses)| InviteUse::new(*code, *uses))
                .collect(),
        );
    }

    pub fn fail_fetch(&self, community: CommunityId, error: PlatformError) {
        self.state
            .lock()
            .unwrap()
            .fetch_failures
            .insert(community, error);
    }

    pub fn add_role(&self, community: CommunityId, role: RoleId) {
        self.state.lock().unwrap().roles.insert((community, role));
    }

    pub fn delete_role(&self, community: CommunityId, role: RoleId) {
        self.state.lock().unwrap().roles.remove(&(community, role));
    }

    pub fn fail_grant(&self, role: RoleId, error: PlatformError) {
        self.state.lock().unwrap().grant_failures.insert(role, error);
    }

    pub fn set_system_channel(&self, community: CommunityId, channel: ChannelId) {
        self.state
            .lock()
            .unwrap()
            .system_channels
            .insert(community, channel);
    }

    pub fn grants(&self) -> Vec<RecordedGrant> {
        self.state.lock().unwrap().grants.clone()
    }

    pub fn messages(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn fetch_invites(&self, community: CommunityId) -> Result<Vec<InviteUse>, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        if let Some(e) = state.fetch_failures.get(&community) {
            return Err(e.clone());
        }
        Ok(state.invites.get(&community).cloned().unwrap_or_default())
    }

    async fn grant_role(
        &self,
        community: CommunityId,
        member: MemberId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.grant_failures.get(&role) {
            return Err(e.clone());
        }
        if !state.roles.contains(&(community, role)) {
            return Err(PlatformError::NotFound);
        }
        state.grants.push(RecordedGrant {
            community,
            member,
            role,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn role_exists(
        &self,
        community: CommunityId,
        role: RoleId,
    ) -> Result<bool, PlatformError> {
        Ok(self.state.lock().unwrap().roles.contains(&(community, role)))
    }

    async fn system_channel(
        &self,
        community: CommunityId,
    ) -> Result<Option<ChannelId>, PlatformError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .system_channels
            .get(&community)
            .copied())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .messages
            .push((channel, content.to_string()));
        Ok(())
    }
}

/// In-memory settings store with scripted failures.
#[derive(Default)]
pub struct FakeStore {
    records: Mutex<HashMap<CommunityId, CommunitySettings>>,
    failing: Mutex<HashSet<CommunityId>>,
    failing_deletes: Mutex<HashSet<CommunityId>>,
    stalled: Mutex<HashSet<CommunityId>>,
    saves: Mutex<usize>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, community: CommunityId, fail: bool) {
        let mut failing = self.failing.lock().unwrap();
        if fail {
            failing.insert(community);
        } else {
            failing.remove(&community);
        }
    }

    pub fn fail_deletes(&self, community: CommunityId, fail: bool) {
        let mut failing = self.failing_deletes.lock().unwrap();
        if fail {
            failing.insert(community);
        } else {
            failing.remove(&community);
        }
    }

    /// Make every save for `community` hang forever.
    pub fn stall_saves(&self, community: CommunityId) {
        self.stalled.lock().unwrap().insert(community);
    }

    pub fn record(&self, community: CommunityId) -> Option<CommunitySettings> {
        self.records.lock().unwrap().get(&community).cloned()
    }

    pub fn insert_record(&self, community: CommunityId, settings: CommunitySettings) {
        self.records.lock().unwrap().insert(community, settings);
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl SettingsStore for FakeStore {
    async fn load(&self, community: CommunityId) -> BotResult<Option<CommunitySettings>> {
        Ok(self.record(community))
    }

    async fn save(&self, community: CommunityId, settings: &CommunitySettings) -> BotResult<()> {
        let stalled = self.stalled.lock().unwrap().contains(&community);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(&community) {
            return Err(BotError::Internal("disk full".into()));
        }
        *self.saves.lock().unwrap() += 1;
        self.insert_record(community, settings.clone());
        Ok(())
    }

    async fn delete(&self, community: CommunityId) -> BotResult<()> {
        if self.failing_deletes.lock().unwrap().contains(&community) {
            return Err(BotError::Internal("database is locked".into()));
        }
        self.records.lock().unwrap().remove(&community);
        Ok(())
    }
}
