use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::CommunityId;
use super::settings::{CommunitySettings, PendingFlush, SettingsCache};
use crate::db::store::SettingsStore;
use crate::error::BotResult;

/// Default interval between periodic flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    /// Stored records of departed communities deleted on retry.
    pub deleted: usize,
    pub failed: usize,
}

/// Writes dirty community settings back to the store.
///
/// The in-memory cache is authoritative while the process runs; the store
/// lags it by at most one flush interval. Store writes for a community are
/// serialized with its deletion so a flush racing a leave can't resurrect
/// the record. Each community has its own write lock; a stalled write never
/// holds up another community.
pub struct PersistenceScheduler {
    cache: Arc<SettingsCache>,
    store: Arc<dyn SettingsStore>,
    interval: Duration,
    write_locks: DashMap<CommunityId, Arc<Mutex<()>>>,
    /// Departed communities whose stored record still has to be deleted.
    pending_deletes: DashSet<CommunityId>,
}

impl PersistenceScheduler {
    pub fn new(cache: Arc<SettingsCache>, store: Arc<dyn SettingsStore>, interval: Duration) -> Self {
        Self {
            cache,
            store,
            interval,
            write_locks: DashMap::new(),
            pending_deletes: DashSet::new(),
        }
    }

    // Clone the lock out so the shard lock is released before awaiting.
    fn write_lock(&self, community: CommunityId) -> Arc<Mutex<()>> {
        self.write_locks.entry(community).or_default().clone()
    }

    /// Load a community's stored settings.
    ///
    /// A record still waiting for deletion from an earlier leave is treated
    /// as absent; the caller's write of fresh defaults replaces it.
    pub async fn load(&self, community: CommunityId) -> BotResult<Option<CommunitySettings>> {
        let lock = self.write_lock(community);
        let _guard = lock.lock().await;
        if self.pending_deletes.remove(&community).is_some() {
            info!(%community, "community rejoined before its old settings were deleted, starting fresh");
            return Ok(None);
        }
        self.store.load(community).await
    }

    pub fn is_delete_pending(&self, community: CommunityId) -> bool {
        self.pending_deletes.contains(&community)
    }

    async fn flush_one(&self, community: CommunityId) -> BotResult<bool> {
        let lock = self.write_lock(community);
        let _guard = lock.lock().await;
        // Re-read under the lock: the community may have left since the
        // caller decided to flush it.
        let Some(PendingFlush {
            settings, version, ..
        }) = self.cache.pending(community)
        else {
            return Ok(false);
        };
        self.store.save(community, &settings).await?;
        self.cache.mark_flushed(community, version);
        Ok(true)
    }

    async fn delete_one(&self, community: CommunityId) -> BotResult<bool> {
        let lock = self.write_lock(community);
        let _guard = lock.lock().await;
        if !self.pending_deletes.contains(&community) || self.cache.contains(community) {
            self.pending_deletes.remove(&community);
            return Ok(false);
        }
        self.store.delete(community).await?;
        self.pending_deletes.remove(&community);
        Ok(true)
    }

    async fn flush_many(&self, communities: Vec<CommunityId>) -> FlushReport {
        let mut report = FlushReport::default();
        for community in communities {
            match self.flush_one(community).await {
                Ok(true) => report.flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(%community, error = %e, "failed to flush settings");
                }
            }
        }

        let departed: Vec<CommunityId> = self.pending_deletes.iter().map(|c| *c).collect();
        for community in departed {
            match self.delete_one(community).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(%community, error = %e, "failed to delete settings of departed community");
                }
            }
        }
        report
    }

    /// Flush every dirty community and retry pending deletions. A failed
    /// community stays dirty for the next tick; the others are still flushed.
    pub async fn flush_dirty(&self) -> FlushReport {
        let dirty = self.cache.dirty().into_iter().map(|p| p.community).collect();
        let report = self.flush_many(dirty).await;
        if report.flushed > 0 || report.deleted > 0 || report.failed > 0 {
            debug!(
                flushed = report.flushed,
                deleted = report.deleted,
                failed = report.failed,
                "periodic settings flush"
            );
        }
        report
    }

    /// Flush every community regardless of its dirty flag. Used on shutdown.
    pub async fn flush_all(&self) -> FlushReport {
        let report = self.flush_many(self.cache.communities()).await;
        info!(
            flushed = report.flushed,
            deleted = report.deleted,
            failed = report.failed,
            "flushed all settings"
        );
        report
    }

    /// Flush a single community immediately.
    pub async fn write_through(&self, community: CommunityId) -> BotResult<()> {
        self.flush_one(community).await.map(|_| ())
    }

    /// Remove a community from the cache and delete its stored record.
    ///
    /// If the delete fails the community is still dropped from memory and
    /// the delete is retried on every flush until it succeeds.
    pub async fn evict(&self, community: CommunityId) -> BotResult<bool> {
        let lock = self.write_lock(community);
        let _guard = lock.lock().await;
        let removed = self.cache.remove(community).is_some();
        if let Err(e) = self.store.delete(community).await {
            warn!(%community, error = %e, "failed to delete settings, will retry on next flush");
            self.pending_deletes.insert(community);
            return Err(e);
        }
        self.pending_deletes.remove(&community);
        Ok(removed)
    }

    /// Periodic flush loop. Returns when `cancel` fires; the caller is
    /// responsible for the final `flush_all`.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(interval_secs = self.interval.as_secs(), "settings flush scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("settings flush scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.flush_dirty().await;
                }
            }
        }
    }
}
