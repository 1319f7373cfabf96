use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client {}", self.0)
    }
}

/// One remote client as seen by the server replicator.
pub trait AbstractConnection: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    name: String,
}

impl ClientConnection {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: ConnectionId(id),
            name: name.into(),
        }
    }
}

impl AbstractConnection for ClientConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
