use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::events::CommunityId;
use super::platform::{InviteUse, Platform, PlatformError};

/// Invite code -> cumulative use count, as last observed.
pub type InviteSnapshot = HashMap<String, u64>;

/// Invite code -> positive use-count increase between two observations.
pub type UsageDelta = BTreeMap<String, u64>;

#[derive(Default)]
struct TrackerState {
    snapshot: InviteSnapshot,
    delta: Arc<UsageDelta>,
    /// False until a baseline has been observed. Without one every invite
    /// would look freshly used.
    primed: bool,
}

/// Tracks invite use counters per community and derives which invites were
/// used between consecutive observations.
///
/// Each community has its own async mutex, held across the platform fetch,
/// so updates and delta reads on one community are serialized while other
/// communities proceed independently.
pub struct InviteUsageTracker {
    platform: Arc<dyn Platform>,
    communities: DashMap<CommunityId, Arc<Mutex<TrackerState>>>,
}

impl InviteUsageTracker {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            communities: DashMap::new(),
        }
    }

    // Clone the slot out so the shard lock is released before awaiting.
    // Only `prime` creates a slot; the other paths never resurrect a
    // community that was forgotten.
    fn slot(&self, community: CommunityId) -> Option<Arc<Mutex<TrackerState>>> {
        self.communities.get(&community).map(|s| s.clone())
    }

    /// Take the initial snapshot for a community. Publishes an empty delta.
    ///
    /// Registers the community even if the fetch fails; the first `update`
    /// then becomes the baseline.
    pub async fn prime(&self, community: CommunityId) -> Result<(), PlatformError> {
        let slot = self.communities.entry(community).or_default().clone();
        let mut state = slot.lock().await;
        let invites = self.platform.fetch_invites(community).await?;
        state.snapshot = to_snapshot(invites);
        state.delta = Arc::new(UsageDelta::new());
        state.primed = true;
        debug!(%community, invites = state.snapshot.len(), "invite tracker primed");
        Ok(())
    }

    /// Fetch the community's invites, compute the delta against the previous
    /// snapshot, then replace both the snapshot and the published delta.
    ///
    /// On fetch failure the previous snapshot and delta stay in place. An
    /// unregistered community yields an empty delta and no state.
    pub async fn update(&self, community: CommunityId) -> Result<Arc<UsageDelta>, PlatformError> {
        let Some(slot) = self.slot(community) else {
            debug!(%community, "invite update for untracked community ignored");
            return Ok(Arc::new(UsageDelta::new()));
        };
        let mut state = slot.lock().await;
        let current = to_snapshot(self.platform.fetch_invites(community).await?);

        let delta = if state.primed {
            compute_delta(community, &state.snapshot, &current)
        } else {
            warn!(%community, "invite tracker had no baseline, treating this update as one");
            state.primed = true;
            UsageDelta::new()
        };

        state.snapshot = current;
        state.delta = Arc::new(delta);
        Ok(state.delta.clone())
    }

    /// The most recently published delta (empty before the first update).
    pub async fn delta(&self, community: CommunityId) -> Arc<UsageDelta> {
        match self.slot(community) {
            Some(slot) => slot.lock().await.delta.clone(),
            None => Arc::new(UsageDelta::new()),
        }
    }

    /// Copy of the last observed snapshot.
    pub async fn snapshot(&self, community: CommunityId) -> InviteSnapshot {
        match self.slot(community) {
            Some(slot) => slot.lock().await.snapshot.clone(),
            None => InviteSnapshot::new(),
        }
    }

    /// Drop all tracking state for a community.
    pub fn forget(&self, community: CommunityId) {
        self.communities.remove(&community);
    }

    pub fn is_tracking(&self, community: CommunityId) -> bool {
        self.communities.contains_key(&community)
    }
}

fn to_snapshot(invites: Vec<InviteUse>) -> InviteSnapshot {
    invites.into_iter().map(|i| (i.code, i.uses)).collect()
}

/// `delta[code] = current - previous(code, 0)` for every invite in `current`.
///
/// Zero differences are omitted. Negative differences (an invite deleted and
/// recreated with the same code) are dropped and logged.
pub fn compute_delta(
    community: CommunityId,
    previous: &InviteSnapshot,
    current: &InviteSnapshot,
) -> UsageDelta {
    let mut delta = UsageDelta::new();
    for (code, &uses) in current {
        let before = previous.get(code).copied().unwrap_or(0);
        match uses.checked_sub(before) {
            Some(0) => {}
            Some(diff) => {
                delta.insert(code.clone(), diff);
            }
            None => {
                warn!(
                    %community,
                    code = %code,
                    before,
                    after = uses,
                    "invite use counter went backwards, ignoring"
                );
            }
        }
    }
    delta
}
