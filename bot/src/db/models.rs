/// A stored `community_settings` row.
///
/// Snowflake ids are stored as SQLite INTEGER (i64); the cast to and from
/// u64 preserves every bit.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommunitySettingsRow {
    pub community_id: i64,
    /// JSON object of invite code -> role id.
    pub invite_roles: String,
    pub warnings_enabled: i32,
    /// One of `disabled`, `system_default`, `explicit`.
    pub log_channel_kind: String,
    pub log_channel_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}
