//! Replication blocks exchanged between nodes.
//!
//! A block announces that one object was created, updated or removed on the
//! sending node. Creation and update blocks carry the object's full
//! serialized state. Blocks are JSON on the wire:
//!
//! ```json
//! {"kind":"updated","sender":"…","object_id":"…","state":{…}}
//! ```

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tierstack_types::{ObjectId, SessionId};

/// A creation, update or removal notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicationBlock {
    /// An object was created on the sender.
    Created {
        sender: SessionId,
        object_id: ObjectId,
        state: Value,
    },

    /// An object was committed on the sender.
    Updated {
        sender: SessionId,
        object_id: ObjectId,
        state: Value,
    },

    /// An object was deleted on the sender.
    Removed {
        sender: SessionId,
        object_id: ObjectId,
    },
}

impl ReplicationBlock {
    pub fn created(sender: SessionId, object_id: ObjectId, state: Value) -> Self {
        Self::Created {
            sender,
            object_id,
            state,
        }
    }

    pub fn updated(sender: SessionId, object_id: ObjectId, state: Value) -> Self {
        Self::Updated {
            sender,
            object_id,
            state,
        }
    }

    pub fn removed(sender: SessionId, object_id: ObjectId) -> Self {
        Self::Removed { sender, object_id }
    }

    /// Session of the node that published the block.
    pub fn sender(&self) -> SessionId {
        match self {
            Self::Created { sender, .. }
            | Self::Updated { sender, .. }
            | Self::Removed { sender, .. } => *sender,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        match self {
            Self::Created { object_id, .. }
            | Self::Updated { object_id, .. }
            | Self::Removed { object_id, .. } => *object_id,
        }
    }

    /// Short name of the block kind for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Removed { .. } => "removed",
        }
    }

    /// Encodes the block for the wire.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a block received from the wire.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Protocol(format!("malformed block: {e}")))
    }
}
