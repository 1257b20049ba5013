use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::DistanceVector;
use crate::RouterId;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Wire message. The transport address is not part of the payload: it is taken
/// from the datagram envelope on receipt and supplied separately on send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessage {
    /// Router -> server, once at startup. `router_id` is the sender.
    Join { router_id: RouterId },
    /// Server -> router, once all routers joined. `router_id` is the destination.
    Response {
        router_id: RouterId,
        table: DistanceVector,
    },
    /// Router -> server -> neighbors. `router_id` is always the original sender.
    Update {
        router_id: RouterId,
        table: DistanceVector,
    },
    /// Server -> every joined router, ends the run.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Join,
    Response,
    Update,
    Terminate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Join => "JOIN",
            MessageKind::Response => "RESPONSE",
            MessageKind::Update => "UPDATE",
            MessageKind::Terminate => "TERMINATE",
        };
        f.write_str(name)
    }
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::Join { .. } => MessageKind::Join,
            ProtocolMessage::Response { .. } => MessageKind::Response,
            ProtocolMessage::Update { .. } => MessageKind::Update,
            ProtocolMessage::Terminate => MessageKind::Terminate,
        }
    }

    pub fn router_id(&self) -> Option<&str> {
        match self {
            ProtocolMessage::Join { router_id }
            | ProtocolMessage::Response { router_id, .. }
            | ProtocolMessage::Update { router_id, .. } => Some(router_id.as_str()),
            ProtocolMessage::Terminate => None,
        }
    }

    pub fn table(&self) -> Option<&DistanceVector> {
        match self {
            ProtocolMessage::Response { table, .. } | ProtocolMessage::Update { table, .. } => Some(table),
            ProtocolMessage::Join { .. } | ProtocolMessage::Terminate => None,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
