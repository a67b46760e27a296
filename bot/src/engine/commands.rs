use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::events::{CommunityId, RoleId};
use super::platform::Platform;
use super::settings::{CommunitySettings, LogChannel, SettingsCache};
use super::validation::{
    censor_invite_code, normalize_invite_code, validate_invite_code, validate_snowflake,
};
use crate::error::{BotError, BotResult};

/// Result of an admin command, rendered by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,
    pub message: String,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl From<BotResult<String>> for CommandResponse {
    fn from(result: BotResult<String>) -> Self {
        match result {
            Ok(message) => CommandResponse::ok(message),
            Err(e) => CommandResponse::error(e.to_string()),
        }
    }
}

/// Admin commands, as delivered by the command dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    GetSettings,
    ListInviteRoles,
    GetInviteRole { code: String },
    SetInviteRole { code: String, role: RoleId },
    RemoveInviteRole { code: String },
    SetWarningsEnabled { enabled: bool },
    SetLogChannel { log_channel: LogChannel },
}

/// Settings commands. Never holds a settings lock across a platform call.
pub struct CommandService {
    platform: Arc<dyn Platform>,
    settings: Arc<SettingsCache>,
}

impl CommandService {
    pub fn new(platform: Arc<dyn Platform>, settings: Arc<SettingsCache>) -> Self {
        Self { platform, settings }
    }

    pub async fn execute(&self, community: CommunityId, command: Command) -> CommandResponse {
        let response = match command {
            Command::GetSettings => self.get_settings(community),
            Command::ListInviteRoles => self.list_invite_roles(community),
            Command::GetInviteRole { code } => self.get_invite_role(community, &code),
            Command::SetInviteRole { code, role } => {
                self.set_invite_role(community, &code, role).await
            }
            Command::RemoveInviteRole { code } => self.remove_invite_role(community, &code),
            Command::SetWarningsEnabled { enabled } => {
                self.set_warnings_enabled(community, enabled)
            }
            Command::SetLogChannel { log_channel } => self.set_log_channel(community, log_channel),
        };
        if !response.ok {
            debug!(%community, message = %response.message, "command rejected");
        }
        response
    }

    fn settings(&self, community: CommunityId) -> BotResult<CommunitySettings> {
        self.settings
            .get(community)
            .ok_or(BotError::UnknownCommunity(community.0))
    }

    fn mutate<R>(
        &self,
        community: CommunityId,
        f: impl FnOnce(&mut CommunitySettings) -> R,
    ) -> BotResult<R> {
        self.settings
            .mutate(community, f)
            .ok_or(BotError::UnknownCommunity(community.0))
    }

    pub fn get_settings(&self, community: CommunityId) -> CommandResponse {
        self.settings(community)
            .map(|s| {
                format!(
                    "Warnings: {}. Log channel: {}. Invite roles configured: {}.",
                    if s.warnings_enabled { "on" } else { "off" },
                    describe_log_channel(s.log_channel),
                    s.invite_roles.len()
                )
            })
            .into()
    }

    pub fn list_invite_roles(&self, community: CommunityId) -> CommandResponse {
        self.settings(community)
            .map(|s| {
                if s.invite_roles.is_empty() {
                    return "No invites with roles.".to_string();
                }
                let entries: Vec<String> = s
                    .invite_roles
                    .iter()
                    .map(|(code, role)| format!("{} -> {role}", censor_invite_code(code)))
                    .collect();
                format!("Invites with roles: {}", entries.join(", "))
            })
            .into()
    }

    pub fn get_invite_role(&self, community: CommunityId, code: &str) -> CommandResponse {
        let code = normalize_invite_code(code);
        self.settings(community)
            .map(|s| match s.role_for(code) {
                Some(role) => format!("Role for invite {} is {role}.", censor_invite_code(code)),
                None => format!("Role for invite {} is not set.", censor_invite_code(code)),
            })
            .into()
    }

    /// Map an invite to a role. Checks that both exist on the platform
    /// before touching the cache.
    pub async fn set_invite_role(
        &self,
        community: CommunityId,
        code: &str,
        role: RoleId,
    ) -> CommandResponse {
        self.try_set_invite_role(community, code, role).await.into()
    }

    async fn try_set_invite_role(
        &self,
        community: CommunityId,
        code: &str,
        role: RoleId,
    ) -> BotResult<String> {
        let code = normalize_invite_code(code);
        validate_invite_code(code).map_err(BotError::Validation)?;
        validate_snowflake("Role", role.0).map_err(BotError::Validation)?;
        if !self.settings.contains(community) {
            return Err(BotError::UnknownCommunity(community.0));
        }

        if !self.platform.role_exists(community, role).await? {
            return Err(BotError::Validation(format!("Role {role} doesn't exist.")));
        }
        let invites = self.platform.fetch_invites(community).await?;
        if !invites.iter().any(|i| i.code == code) {
            return Err(BotError::Validation(format!(
                "Invite {} doesn't exist.",
                censor_invite_code(code)
            )));
        }

        let previous = self.mutate(community, |s| s.set_invite_role(code, role))?;
        info!(%community, code = %code, %role, ?previous, "invite role set");
        Ok(format!(
            "Role {role} is set for invite {}.",
            censor_invite_code(code)
        ))
    }

    pub fn remove_invite_role(&self, community: CommunityId, code: &str) -> CommandResponse {
        let code = normalize_invite_code(code);
        let result = self
            .mutate(community, |s| s.remove_invite_role(code))
            .and_then(|removed| match removed {
                Some(role) => {
                    info!(%community, code = %code, %role, "invite role removed");
                    Ok(format!(
                        "Role was cleared from invite {}.",
                        censor_invite_code(code)
                    ))
                }
                None => Err(BotError::Validation(format!(
                    "Invite {} is not used for roles.",
                    censor_invite_code(code)
                ))),
            });
        result.into()
    }

    pub fn set_warnings_enabled(&self, community: CommunityId, enabled: bool) -> CommandResponse {
        self.mutate(community, |s| s.warnings_enabled = enabled)
            .map(|()| {
                info!(%community, enabled, "warnings setting changed");
                format!("Warnings {}.", if enabled { "enabled" } else { "disabled" })
            })
            .into()
    }

    pub fn set_log_channel(&self, community: CommunityId, log_channel: LogChannel) -> CommandResponse {
        let result = match log_channel {
            LogChannel::Explicit(channel) => {
                validate_snowflake("Channel", channel.0).map_err(BotError::Validation)
            }
            LogChannel::Disabled | LogChannel::SystemDefault => Ok(()),
        }
        .and_then(|()| self.mutate(community, |s| s.log_channel = log_channel))
        .map(|()| {
            info!(%community, ?log_channel, "log channel changed");
            format!("Log channel set to {}.", describe_log_channel(log_channel))
        });
        result.into()
    }
}

fn describe_log_channel(channel: LogChannel) -> String {
    match channel {
        LogChannel::Disabled => "disabled".to_string(),
        LogChannel::SystemDefault => "system channel".to_string(),
        LogChannel::Explicit(id) => format!("channel {id}"),
    }
}
