use thiserror::Error;

use crate::engine::platform::PlatformError;

/// Error taxonomy for the bot core.
///
/// Each variant corresponds to a handling policy rather than a source:
/// validation errors go back to the caller, transient and permission errors
/// become diagnostics, data-integrity errors are self-healed, and internal
/// errors are logged at error severity. None of them terminate the process.
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed admin input (invite code, role id, channel id).
    #[error("{0}")]
    Validation(String),

    /// Timeout or rate limit from the platform. Not retried; the next event
    /// or scheduler tick retries naturally.
    #[error("platform temporarily unavailable: {0}")]
    TransientPlatform(String),

    /// The bot lacks a permission an admin can grant.
    #[error("missing permission: {0}")]
    Permission(String),

    /// A stored reference (role, invite) no longer exists on the platform.
    #[error("stale reference: {0}")]
    DataIntegrity(String),

    /// The community is not in the registry.
    #[error("community {0} is not tracked")]
    UnknownCommunity(u64),

    #[error("settings store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PlatformError> for BotError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::MissingPermissions | PlatformError::RoleHierarchy => {
                BotError::Permission(e.to_string())
            }
            PlatformError::NotFound => BotError::DataIntegrity(e.to_string()),
            PlatformError::RateLimited | PlatformError::Timeout => {
                BotError::TransientPlatform(e.to_string())
            }
            PlatformError::Http(_) | PlatformError::Decode(_) => BotError::Internal(e.to_string()),
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;
