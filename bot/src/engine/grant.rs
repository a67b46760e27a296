use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use super::diagnostics::{self, Diagnostics, Severity};
use super::events::{CommunityId, MemberId, RoleId};
use super::platform::{Platform, PlatformError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleGrantOutcome {
    Granted,
    PermissionDenied,
    HierarchyViolation,
    NotFound,
    InternalError,
}

impl RoleGrantOutcome {
    pub fn classify(result: &Result<(), PlatformError>) -> Self {
        match result {
            Ok(()) => RoleGrantOutcome::Granted,
            Err(PlatformError::MissingPermissions) => RoleGrantOutcome::PermissionDenied,
            Err(PlatformError::RoleHierarchy) => RoleGrantOutcome::HierarchyViolation,
            Err(PlatformError::NotFound) => RoleGrantOutcome::NotFound,
            Err(_) => RoleGrantOutcome::InternalError,
        }
    }

    /// Failures an admin can fix by adjusting permissions or role order.
    pub fn is_admin_fixable(self) -> bool {
        matches!(
            self,
            RoleGrantOutcome::PermissionDenied | RoleGrantOutcome::HierarchyViolation
        )
    }
}

/// Grants roles and reports failures to the community's log channel.
pub struct RoleGrantExecutor {
    platform: Arc<dyn Platform>,
    diagnostics: Arc<Diagnostics>,
}

impl RoleGrantExecutor {
    pub fn new(platform: Arc<dyn Platform>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            platform,
            diagnostics,
        }
    }

    /// Grant `role` to `member`. Emits exactly one diagnostic when the grant
    /// fails and none when it succeeds.
    pub async fn grant(
        &self,
        community: CommunityId,
        member: MemberId,
        role: RoleId,
        reason: &str,
    ) -> RoleGrantOutcome {
        let result = self
            .platform
            .grant_role(community, member, role, reason)
            .await;
        let outcome = RoleGrantOutcome::classify(&result);

        match (&result, outcome) {
            (Ok(()), _) => {
                info!(%community, %member, %role, "role granted");
            }
            (Err(e), outcome) if outcome.is_admin_fixable() => {
                info!(%community, %member, %role, error = %e, ?outcome, "role grant refused");
                self.diagnostics
                    .send(
                        community,
                        Severity::Error,
                        &diagnostics::grant_forbidden(member, role),
                    )
                    .await;
            }
            (Err(e), outcome) => {
                error!(%community, %member, %role, error = %e, ?outcome, "role grant failed");
                self.diagnostics
                    .send(
                        community,
                        Severity::Error,
                        &diagnostics::grant_failed(member, role),
                    )
                    .await;
            }
        }

        outcome
    }
}
