use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::models::CommunitySettingsRow;
use crate::db::queries::settings::{self, UpsertSettingsParams};
use crate::engine::events::{ChannelId, CommunityId};
use crate::engine::settings::{CommunitySettings, LogChannel};
use crate::error::{BotError, BotResult};

/// Durable storage for community settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self, community: CommunityId) -> BotResult<Option<CommunitySettings>>;
    async fn save(&self, community: CommunityId, settings: &CommunitySettings) -> BotResult<()>;
    async fn delete(&self, community: CommunityId) -> BotResult<()>;
}

/// `SettingsStore` backed by the `community_settings` table.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn load(&self, community: CommunityId) -> BotResult<Option<CommunitySettings>> {
        settings::get_settings(&self.pool, community.0 as i64)
            .await?
            .map(row_to_settings)
            .transpose()
    }

    async fn save(&self, community: CommunityId, s: &CommunitySettings) -> BotResult<()> {
        let invite_roles = serde_json::to_string(&s.invite_roles)
            .map_err(|e| BotError::Internal(format!("failed to encode invite roles: {e}")))?;
        let (kind, channel) = encode_log_channel(s.log_channel);
        settings::upsert_settings(
            &self.pool,
            &UpsertSettingsParams {
                community_id: community.0 as i64,
                invite_roles: &invite_roles,
                warnings_enabled: s.warnings_enabled,
                log_channel_kind: kind,
                log_channel_id: channel.map(|c| c.0 as i64),
            },
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, community: CommunityId) -> BotResult<()> {
        settings::delete_settings(&self.pool, community.0 as i64).await?;
        Ok(())
    }
}

fn encode_log_channel(channel: LogChannel) -> (&'static str, Option<ChannelId>) {
    match channel {
        LogChannel::Disabled => ("disabled", None),
        LogChannel::SystemDefault => ("system_default", None),
        LogChannel::Explicit(id) => ("explicit", Some(id)),
    }
}

fn decode_log_channel(kind: &str, channel: Option<i64>) -> BotResult<LogChannel> {
    match (kind, channel) {
        ("disabled", _) => Ok(LogChannel::Disabled),
        ("system_default", _) => Ok(LogChannel::SystemDefault),
        ("explicit", Some(id)) => Ok(LogChannel::Explicit(ChannelId(id as u64))),
        (kind, channel) => Err(BotError::DataIntegrity(format!(
            "invalid log channel kind={kind} channel={channel:?}"
        ))),
    }
}

fn row_to_settings(row: CommunitySettingsRow) -> BotResult<CommunitySettings> {
    let invite_roles = serde_json::from_str(&row.invite_roles).map_err(|e| {
        BotError::DataIntegrity(format!(
            "invite roles of community {} are not valid JSON: {e}",
            row.community_id as u64
        ))
    })?;
    Ok(CommunitySettings {
        invite_roles,
        warnings_enabled: row.warnings_enabled != 0,
        log_channel: decode_log_channel(&row.log_channel_kind, row.log_channel_id)?,
    })
}
