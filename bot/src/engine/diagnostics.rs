use std::sync::Arc;

use tracing::{debug, info};

use super::events::{ChannelId, CommunityId, MemberId, RoleId};
use super::platform::Platform;
use super::settings::{LogChannel, SettingsCache};
use super::validation::censor_invite_code;
use crate::error::BotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A limitation of invite tracking or a self-healed inconsistency.
    /// Suppressed when the community disabled warnings.
    Warning,
    /// A failure an admin should look at. Always posted if a log channel
    /// is available.
    Error,
}

/// Posts operational diagnostics to a community's log channel.
pub struct Diagnostics {
    platform: Arc<dyn Platform>,
    settings: Arc<SettingsCache>,
}

impl Diagnostics {
    pub fn new(platform: Arc<dyn Platform>, settings: Arc<SettingsCache>) -> Self {
        Self { platform, settings }
    }

    /// Resolve the channel diagnostics go to, honoring the log channel
    /// setting. None means nothing should be posted.
    pub async fn resolve_channel(&self, community: CommunityId) -> Option<ChannelId> {
        let log_channel = self.settings.get(community)?.log_channel;
        match log_channel {
            LogChannel::Disabled => None,
            LogChannel::Explicit(channel) => Some(channel),
            LogChannel::SystemDefault => match self.platform.system_channel(community).await {
                Ok(channel) => channel,
                Err(e) => {
                    info!(%community, error = %e, "failed to look up system channel");
                    None
                }
            },
        }
    }

    /// Post a diagnostic. Returns true if a message was sent.
    ///
    /// Delivery failures are logged and otherwise ignored.
    pub async fn send(&self, community: CommunityId, severity: Severity, text: &str) -> bool {
        let Some(settings) = self.settings.get(community) else {
            debug!(%community, "diagnostic for untracked community dropped");
            return false;
        };
        if severity == Severity::Warning && !settings.warnings_enabled {
            debug!(%community, "warnings disabled, diagnostic dropped");
            return false;
        }
        let Some(channel) = self.resolve_channel(community).await else {
            debug!(%community, "no log channel available, diagnostic dropped");
            return false;
        };
        match self.platform.send_message(channel, text).await {
            Ok(()) => {
                debug!(%community, %channel, "diagnostic sent");
                true
            }
            Err(e) => {
                info!(%community, %channel, error = %e, "failed to send diagnostic");
                false
            }
        }
    }
}

// ── Message texts ───────────────────────────────────────────────────

pub fn ambiguous_join(member: MemberId, codes: &[String]) -> String {
    let candidates: Vec<String> = codes.iter().map(|c| censor_invite_code(c)).collect();
    format!(
        "Two or more members joined at the same time (latest: {member}). \
         The invite used by each member can't be determined, so no invite roles \
         were granted. Candidate invites: {}. Please grant roles manually.",
        candidates.join(", ")
    )
}

pub fn stale_role_removed(code: &str, role: RoleId) -> String {
    format!(
        "Role {role} configured for invite {} no longer exists. The invite role was removed.",
        censor_invite_code(code)
    )
}

pub fn tracking_failed(member: MemberId, error: &BotError) -> String {
    format!(
        "Couldn't determine which invite member {member} joined with ({error}). \
         No invite role was granted."
    )
}

pub fn grant_forbidden(member: MemberId, role: RoleId) -> String {
    format!(
        "Can't grant role {role} to member {member}: the bot is missing the Manage Roles \
         permission or the role is above the bot's highest role."
    )
}

pub fn grant_failed(member: MemberId, role: RoleId) -> String {
    format!("Failed to grant role {role} to member {member} due to an internal error.")
}
