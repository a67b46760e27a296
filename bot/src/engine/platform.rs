use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::events::{ChannelId, CommunityId, MemberId, RoleId};

/// An invite as reported by the platform: its code and cumulative use count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteUse {
    pub code: String,
    pub uses: u64,
}

impl InviteUse {
    pub fn new(code: impl Into<String>, uses: u64) -> Self {
        Self {
            code: code.into(),
            uses,
        }
    }
}

/// Failure of a platform request. Timeouts are enforced by the client, not
/// by the core, and surface here as an ordinary variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("missing permissions")]
    MissingPermissions,
    #[error("role is above the bot's highest role")]
    RoleHierarchy,
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The chat-platform surface the core consumes.
///
/// Every call is asynchronous and may complete on any worker thread.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Current invites of a community with their use counters.
    async fn fetch_invites(&self, community: CommunityId) -> Result<Vec<InviteUse>, PlatformError>;

    /// Add a role to a member. `reason` lands in the community's audit log.
    async fn grant_role(
        &self,
        community: CommunityId,
        member: MemberId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Whether a role currently exists in the community.
    async fn role_exists(&self, community: CommunityId, role: RoleId)
    -> Result<bool, PlatformError>;

    /// The community's system message channel, if it has one.
    async fn system_channel(
        &self,
        community: CommunityId,
    ) -> Result<Option<ChannelId>, PlatformError>;

    /// Post a plain text message. Callers treat this as fire-and-forget.
    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError>;
}
