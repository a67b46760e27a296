use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake!(
    /// A community (guild) the bot has joined.
    CommunityId
);
snowflake!(
    /// A role within a community.
    RoleId
);
snowflake!(
    /// A text channel.
    ChannelId
);
snowflake!(
    /// A member (user) of a community.
    MemberId
);

/// Events delivered by the platform gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// A member joined a community.
    MemberJoined {
        community: CommunityId,
        member: MemberId,
        /// Bot and other automated accounts never carry an invite delta.
        #[serde(default)]
        is_bot: bool,
    },

    /// The bot was added to a community (or saw it on startup).
    CommunityJoined { community: CommunityId },

    /// The bot was removed from a community.
    CommunityLeft { community: CommunityId },

    /// A role was deleted from a community.
    RoleDeleted { community: CommunityId, role: RoleId },

    /// An invite was deleted or expired.
    InviteDeleted { community: CommunityId, code: String },
}

impl PlatformEvent {
    pub fn community(&self) -> CommunityId {
        match self {
            PlatformEvent::MemberJoined { community, .. }
            | PlatformEvent::CommunityJoined { community }
            | PlatformEvent::CommunityLeft { community }
            | PlatformEvent::RoleDeleted { community, .. }
            | PlatformEvent::InviteDeleted { community, .. } => *community,
        }
    }
}
