use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::events::{ChannelId, CommunityId, RoleId};

/// Where diagnostics for a community are posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "channel", rename_all = "snake_case")]
pub enum LogChannel {
    /// No diagnostics are posted.
    Disabled,
    /// The community's system message channel.
    #[default]
    SystemDefault,
    /// A specific channel chosen by an admin.
    Explicit(ChannelId),
}

/// Per-community configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunitySettings {
    /// Invite code -> role granted to members joining through it. Only
    /// invites with a configured role have an entry.
    pub invite_roles: BTreeMap<String, RoleId>,
    pub warnings_enabled: bool,
    pub log_channel: LogChannel,
}

impl Default for CommunitySettings {
    fn default() -> Self {
        Self {
            invite_roles: BTreeMap::new(),
            warnings_enabled: true,
            log_channel: LogChannel::SystemDefault,
        }
    }
}

impl CommunitySettings {
    pub fn role_for(&self, code: &str) -> Option<RoleId> {
        self.invite_roles.get(code).copied()
    }

    /// Returns the previously configured role, if any.
    pub fn set_invite_role(&mut self, code: &str, role: RoleId) -> Option<RoleId> {
        self.invite_roles.insert(code.to_string(), role)
    }

    pub fn remove_invite_role(&mut self, code: &str) -> Option<RoleId> {
        self.invite_roles.remove(code)
    }

    /// Drop every mapping that grants `role`. Returns the affected codes.
    pub fn remove_role(&mut self, role: RoleId) -> Vec<String> {
        let codes: Vec<String> = self
            .invite_roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(c, _)| c.clone())
            .collect();
        for code in &codes {
            self.invite_roles.remove(code);
        }
        codes
    }
}

struct Entry {
    settings: CommunitySettings,
    dirty: bool,
    /// Bumped on every mutation. A flush records the version it wrote so a
    /// mutation racing the flush keeps the entry dirty.
    version: u64,
}

/// A settings snapshot taken for flushing.
#[derive(Debug, Clone)]
pub struct PendingFlush {
    pub community: CommunityId,
    pub settings: CommunitySettings,
    pub version: u64,
}

/// Registry of joined communities and their settings.
///
/// Entries live in a sharded map; every access takes the shard lock only for
/// the duration of a synchronous read or mutation, never across an await.
#[derive(Default)]
pub struct SettingsCache {
    entries: DashMap<CommunityId, Entry>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a community. Returns false (and leaves the existing entry
    /// untouched) if it is already present.
    pub fn insert(&self, community: CommunityId, settings: CommunitySettings, dirty: bool) -> bool {
        use dashmap::mapref::entry::Entry as MapEntry;
        match self.entries.entry(community) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(v) => {
                v.insert(Entry {
                    settings,
                    dirty,
                    version: 0,
                });
                true
            }
        }
    }

    pub fn remove(&self, community: CommunityId) -> Option<CommunitySettings> {
        self.entries.remove(&community).map(|(_, e)| e.settings)
    }

    pub fn contains(&self, community: CommunityId) -> bool {
        self.entries.contains_key(&community)
    }

    pub fn get(&self, community: CommunityId) -> Option<CommunitySettings> {
        self.entries.get(&community).map(|e| e.settings.clone())
    }

    pub fn role_for(&self, community: CommunityId, code: &str) -> Option<RoleId> {
        self.entries
            .get(&community)
            .and_then(|e| e.settings.role_for(code))
    }

    /// Apply `f` to a community's settings. Marks the entry dirty if the
    /// settings changed. Returns None if the community is unknown.
    pub fn mutate<R>(
        &self,
        community: CommunityId,
        f: impl FnOnce(&mut CommunitySettings) -> R,
    ) -> Option<R> {
        let mut entry = self.entries.get_mut(&community)?;
        let before = entry.settings.clone();
        let result = f(&mut entry.settings);
        if entry.settings != before {
            entry.dirty = true;
            entry.version += 1;
        }
        Some(result)
    }

    pub fn is_dirty(&self, community: CommunityId) -> bool {
        self.entries.get(&community).is_some_and(|e| e.dirty)
    }

    pub fn pending(&self, community: CommunityId) -> Option<PendingFlush> {
        self.entries.get(&community).map(|e| PendingFlush {
            community,
            settings: e.settings.clone(),
            version: e.version,
        })
    }

    /// Snapshots of every dirty community.
    pub fn dirty(&self) -> Vec<PendingFlush> {
        self.entries
            .iter()
            .filter(|e| e.dirty)
            .map(|e| PendingFlush {
                community: *e.key(),
                settings: e.settings.clone(),
                version: e.version,
            })
            .collect()
    }

    /// Snapshots of every community, dirty or not.
    pub fn all(&self) -> Vec<PendingFlush> {
        self.entries
            .iter()
            .map(|e| PendingFlush {
                community: *e.key(),
                settings: e.settings.clone(),
                version: e.version,
            })
            .collect()
    }

    /// Clear the dirty flag after a successful flush of `version`. Has no
    /// effect if the entry was mutated since the snapshot was taken.
    pub fn mark_flushed(&self, community: CommunityId, version: u64) -> bool {
        match self.entries.get_mut(&community) {
            Some(mut e) if e.version == version => {
                e.dirty = false;
                true
            }
            _ => false,
        }
    }

    pub fn communities(&self) -> Vec<CommunityId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
