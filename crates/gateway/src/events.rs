//! Events emitted by shards to their consumers

use serde::Serialize;
use serde_json::Value;
use shardline_core::ShardIdentity;

use crate::state::ShardState;

/// Dispatch event types. Names not listed here map to [`EventKind::Other`]
/// and still carry their raw name in [`ShardEvent::Dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Ready,
    Resumed,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    GuildMembersChunk,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,
    InteractionCreate,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageDeleteBulk,
    MessageReactionAdd,
    MessageReactionRemove,
    PresenceUpdate,
    TypingStart,
    UserUpdate,
    VoiceStateUpdate,
    Other,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "READY" => EventKind::Ready,
            "RESUMED" => EventKind::Resumed,
            "CHANNEL_CREATE" => EventKind::ChannelCreate,
            "CHANNEL_UPDATE" => EventKind::ChannelUpdate,
            "CHANNEL_DELETE" => EventKind::ChannelDelete,
            "GUILD_CREATE" => EventKind::GuildCreate,
            "GUILD_UPDATE" => EventKind::GuildUpdate,
            "GUILD_DELETE" => EventKind::GuildDelete,
            "GUILD_MEMBER_ADD" => EventKind::GuildMemberAdd,
            "GUILD_MEMBER_UPDATE" => EventKind::GuildMemberUpdate,
            "GUILD_MEMBER_REMOVE" => EventKind::GuildMemberRemove,
            "GUILD_MEMBERS_CHUNK" => EventKind::GuildMembersChunk,
            "GUILD_ROLE_CREATE" => EventKind::GuildRoleCreate,
            "GUILD_ROLE_UPDATE" => EventKind::GuildRoleUpdate,
            "GUILD_ROLE_DELETE" => EventKind::GuildRoleDelete,
            "INTERACTION_CREATE" => EventKind::InteractionCreate,
            "MESSAGE_CREATE" => EventKind::MessageCreate,
            "MESSAGE_UPDATE" => EventKind::MessageUpdate,
            "MESSAGE_DELETE" => EventKind::MessageDelete,
            "MESSAGE_DELETE_BULK" => EventKind::MessageDeleteBulk,
            "MESSAGE_REACTION_ADD" => EventKind::MessageReactionAdd,
            "MESSAGE_REACTION_REMOVE" => EventKind::MessageReactionRemove,
            "PRESENCE_UPDATE" => EventKind::PresenceUpdate,
            "TYPING_START" => EventKind::TypingStart,
            "USER_UPDATE" => EventKind::UserUpdate,
            "VOICE_STATE_UPDATE" => EventKind::VoiceStateUpdate,
            _ => EventKind::Other,
        }
    }
}

/// What shards broadcast to consumers
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// A dispatch payload, forwarded unmodified
    Dispatch {
        shard: ShardIdentity,
        kind: EventKind,
        name: String,
        sequence: Option<u64>,
        data: Value,
    },
    StateChanged {
        shard: ShardIdentity,
        state: ShardState,
    },
}

impl ShardEvent {
    pub fn shard(&self) -> ShardIdentity {
        match self {
            ShardEvent::Dispatch { shard, .. } | ShardEvent::StateChanged { shard, .. } => *shard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_resolve() {
        assert_eq!(EventKind::from_name("READY"), EventKind::Ready);
        assert_eq!(EventKind::from_name("MESSAGE_CREATE"), EventKind::MessageCreate);
        assert_eq!(EventKind::from_name("GUILD_SOUNDBOARD_SOUND_CREATE"), EventKind::Other);
    }
}
