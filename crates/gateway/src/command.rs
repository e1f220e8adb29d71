use serde_json::{Value, json};

use crate::protocol::{OutboundFrame, opcode};

/// Commands callers may send through a connected shard
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    /// Replace the bot's presence
    UpdatePresence(Value),
    /// Ask for a guild's member list; members arrive as dispatch events
    RequestGuildMembers {
        guild_id: String,
        query: String,
        limit: u32,
        presences: bool,
        nonce: Option<String>,
    },
    /// Any other opcode, sent as-is
    Raw { op: u8, d: Value },
}

impl GatewayCommand {
    /// All members of a guild
    pub fn all_members(guild_id: impl Into<String>) -> Self {
        GatewayCommand::RequestGuildMembers {
            guild_id: guild_id.into(),
            query: String::new(),
            limit: 0,
            presences: false,
            nonce: None,
        }
    }

    pub fn into_frame(self) -> OutboundFrame {
        match self {
            GatewayCommand::UpdatePresence(presence) => {
                OutboundFrame::new(opcode::PRESENCE_UPDATE, presence)
            }
            GatewayCommand::RequestGuildMembers {
                guild_id,
                query,
                limit,
                presences,
                nonce,
            } => {
                let mut d = json!({
                    "guild_id": guild_id,
                    "query": query,
                    "limit": limit,
                    "presences": presences,
                });
                if let Some(nonce) = nonce {
                    d["nonce"] = Value::String(nonce);
                }
                OutboundFrame::new(opcode::REQUEST_GUILD_MEMBERS, d)
            }
            GatewayCommand::Raw { op, d } => OutboundFrame::new(op, d),
        }
    }
}
