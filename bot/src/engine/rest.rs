use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::events::{ChannelId, CommunityId, MemberId, RoleId};
use super::platform::{InviteUse, Platform, PlatformError};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// JSON error code Discord returns when the bot lacks a permission.
const MISSING_PERMISSIONS_CODE: u64 = 50013;

/// Maximum length Discord accepts for an audit log reason.
const MAX_AUDIT_REASON_LENGTH: usize = 512;

#[derive(Deserialize)]
struct ApiInvite {
    code: String,
    #[serde(default)]
    uses: u64,
}

#[derive(Deserialize)]
struct ApiRole {
    id: String,
}

#[derive(Deserialize)]
struct ApiGuild {
    system_channel_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiErrorBody {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    message: String,
}

/// `Platform` over the Discord REST API.
pub struct DiscordRestClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl DiscordRestClient {
    pub fn new(base: &str, token: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("inviteroles/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, PlatformError> {
        let resp = req.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let error: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
        debug!(%status, code = error.code, message = %error.message, "discord request failed");
        Err(map_status(status, error.code))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let resp = self.send(self.request(Method::GET, path)).await?;
        resp.json::<T>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

/// Map a non-success HTTP status and Discord JSON error code.
pub fn map_status(status: StatusCode, code: u64) -> PlatformError {
    match status {
        StatusCode::FORBIDDEN if code == MISSING_PERMISSIONS_CODE => PlatformError::MissingPermissions,
        StatusCode::FORBIDDEN => PlatformError::RoleHierarchy,
        StatusCode::NOT_FOUND => PlatformError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => PlatformError::Timeout,
        other => PlatformError::Http(other.to_string()),
    }
}

fn map_transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout
    } else {
        PlatformError::Http(e.to_string())
    }
}

fn parse_snowflake(raw: &str) -> Result<u64, PlatformError> {
    raw.parse()
        .map_err(|_| PlatformError::Decode(format!("invalid snowflake: {raw}")))
}

/// Header values must be visible ASCII; the reason is also length-limited.
fn audit_reason(reason: &str) -> String {
    reason
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '*' })
        .take(MAX_AUDIT_REASON_LENGTH)
        .collect()
}

#[async_trait]
impl Platform for DiscordRestClient {
    async fn fetch_invites(&self, community: CommunityId) -> Result<Vec<InviteUse>, PlatformError> {
        let invites: Vec<ApiInvite> = self.get_json(&format!("/guilds/{community}/invites")).await?;
        Ok(invites
            .into_iter()
            .map(|i| InviteUse::new(i.code, i.uses))
            .collect())
    }

    async fn grant_role(
        &self,
        community: CommunityId,
        member: MemberId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let req = self
            .request(
                Method::PUT,
                &format!("/guilds/{community}/members/{member}/roles/{role}"),
            )
            .header("X-Audit-Log-Reason", audit_reason(reason));
        self.send(req).await.map(|_| ())
    }

    async fn role_exists(&self, community: CommunityId, role: RoleId) -> Result<bool, PlatformError> {
        let roles: Vec<ApiRole> = self.get_json(&format!("/guilds/{community}/roles")).await?;
        for r in roles {
            if parse_snowflake(&r.id)? == role.0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn system_channel(&self, community: CommunityId) -> Result<Option<ChannelId>, PlatformError> {
        let guild: ApiGuild = self.get_json(&format!("/guilds/{community}")).await?;
        guild
            .system_channel_id
            .map(|id| parse_snowflake(&id).map(ChannelId))
            .transpose()
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), PlatformError> {
        let req = self
            .request(Method::POST, &format!("/channels/{channel}/messages"))
            .json(&serde_json::json!({
                "content": content,
                "allowed_mentions": { "parse": [] },
            }));
        self.send(req).await.map(|_| ())
    }
}
