use crate::net::{ConnectionId, NetworkId};

pub const MAX_NUM_BEHAVIORS: usize = 29;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicaError {
    #[error("cannot attach more than {MAX_NUM_BEHAVIORS} behaviors to object {0}")]
    TooManyBehaviors(NetworkId),
    #[error("client prefab of object {0} cannot change after replication started")]
    PrefabLocked(NetworkId),
    #[error("behaviors of object {0} cannot change after replication started")]
    BehaviorsLocked(NetworkId),
    #[error("object {0} is already initialized")]
    AlreadyInitialized(NetworkId),
    #[error("object {0} is already registered")]
    DuplicateNetworkId(NetworkId),
    #[error("object {0} is not registered")]
    UnknownObject(NetworkId),
    #[error("{0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("{0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("unexpected end of stream: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("malformed variable-length value")]
    MalformedVle,
    #[error("non-finite floating point value")]
    NonFinite,
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("unknown object kind {0}")]
    UnknownObjectKind(u8),
    #[error("behavior bit {bit} is not known to object {object}")]
    UnknownBehaviorBit { object: NetworkId, bit: u32 },
    #[error("object {object} expected {expected} behaviors, received {received}")]
    BehaviorCountMismatch {
        object: NetworkId,
        expected: usize,
        received: usize,
    },
    #[error("payload of object {object} has {remaining} unread bytes")]
    TrailingBytes { object: NetworkId, remaining: usize },
    #[error("payload of object {object} has {size} bytes, over the {limit} byte limit")]
    PayloadTooLarge {
        object: NetworkId,
        size: usize,
        limit: usize,
    },
    #[error("malformed channel message: {0}")]
    MalformedMessage(String),
    #[error("failed to encode channel message: {0}")]
    MessageEncode(String),
    #[error("object {0} has been invalidated")]
    Invalidated(NetworkId),
    #[error("prefab '{0}' could not be resolved")]
    UnresolvedPrefab(String),
}

impl ReplicaError {
    /// Programmer errors that should never reach a peer.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::TooManyBehaviors(_)
                | Self::PrefabLocked(_)
                | Self::BehaviorsLocked(_)
                | Self::AlreadyInitialized(_)
                | Self::DuplicateNetworkId(_)
                | Self::UnknownObject(_)
                | Self::DuplicateConnection(_)
                | Self::UnknownConnection(_)
                | Self::MessageEncode(_)
        )
    }

    /// Errors caused by bytes received from a peer. The receiver should request a fresh
    /// snapshot of the affected object.
    pub fn is_protocol(&self) -> bool {
        !self.is_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ReplicaError::TooManyBehaviors(NetworkId(1)).is_config());
        assert!(ReplicaError::MalformedVle.is_protocol());
        assert!(
            ReplicaError::UnknownBehaviorBit {
                object: NetworkId(3),
                bit: 7
            }
            .is_protocol()
        );
    }
}
