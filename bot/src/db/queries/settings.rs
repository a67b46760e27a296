use sqlx::SqlitePool;

use crate::db::models::CommunitySettingsRow;

/// Parameters for writing a settings row (avoids too-many-arguments warning).
pub struct UpsertSettingsParams<'a> {
    pub community_id: i64,
    pub invite_roles: &'a str,
    pub warnings_enabled: bool,
    pub log_channel_kind: &'a str,
    pub log_channel_id: Option<i64>,
}

pub async fn get_settings(
    pool: &SqlitePool,
    community_id: i64,
) -> Result<Option<CommunitySettingsRow>, sqlx::Error> {
    sqlx::query_as::<_, CommunitySettingsRow>(
        "SELECT * FROM community_settings WHERE community_id = ?",
    )
    .bind(community_id)
    .fetch_optional(pool)
    .await
}

/// Insert or replace the settings row for a community.
pub async fn upsert_settings(
    pool: &SqlitePool,
    params: &UpsertSettingsParams<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO community_settings \
            (community_id, invite_roles, warnings_enabled, log_channel_kind, log_channel_id) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(community_id) DO UPDATE SET \
            invite_roles = excluded.invite_roles, \
            warnings_enabled = excluded.warnings_enabled, \
            log_channel_kind = excluded.log_channel_kind, \
            log_channel_id = excluded.log_channel_id, \
            updated_at = datetime('now')",
    )
    .bind(params.community_id)
    .bind(params.invite_roles)
    .bind(params.warnings_enabled as i32)
    .bind(params.log_channel_kind)
    .bind(params.log_channel_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a community's settings. Returns true if a row existed.
pub async fn delete_settings(pool: &SqlitePool, community_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM community_settings WHERE community_id = ?")
        .bind(community_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_community_ids(pool: &SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT community_id FROM community_settings ORDER BY community_id")
        .fetch_all(pool)
        .await
}
