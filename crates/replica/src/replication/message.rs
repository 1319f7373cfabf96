use bytes::Bytes;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::error::ReplicaError;
use crate::net::{NetworkFrame, NetworkId};
use crate::object::ObjectKind;

/// Serialized state of one object inside a channel message.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub network_id: NetworkId,
    pub payload: Vec<u8>,
}

/// The kind travels as a raw byte so an unknown value only invalidates its own entry.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub network_id: NetworkId,
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl SnapshotPayload {
    pub fn new(network_id: NetworkId, kind: ObjectKind, payload: Vec<u8>) -> Self {
        Self {
            network_id,
            kind: kind as u8,
            payload,
        }
    }

    pub fn object_kind(&self) -> Result<ObjectKind, ReplicaError> {
        ObjectKind::try_from(self.kind)
    }
}

/// Per-tick message sent over the reliable ordered channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ReliableMessage {
    pub frame: NetworkFrame,
    pub removed: Vec<NetworkId>,
    pub snapshots: Vec<SnapshotPayload>,
    pub deltas: Vec<ObjectPayload>,
}

/// Per-tick message sent over the unreliable channel. Client feedback uses the same framing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct UnreliableMessage {
    pub frame: NetworkFrame,
    pub deltas: Vec<ObjectPayload>,
}

impl ReliableMessage {
    pub fn new(frame: NetworkFrame) -> Self {
        Self {
            frame,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.snapshots.is_empty() && self.deltas.is_empty()
    }

    pub fn serialize(&self) -> Result<Bytes, ReplicaError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| Bytes::from(aligned.into_vec()))
            .map_err(|err| ReplicaError::MessageEncode(err.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ReplicaError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(data))
            .map_err(|err| ReplicaError::MalformedMessage(err.to_string()))
    }
}

impl UnreliableMessage {
    pub fn new(frame: NetworkFrame) -> Self {
        Self {
            frame,
            deltas: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn serialize(&self) -> Result<Bytes, ReplicaError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| Bytes::from(aligned.into_vec()))
            .map_err(|err| ReplicaError::MessageEncode(err.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ReplicaError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(data))
            .map_err(|err| ReplicaError::MalformedMessage(err.to_string()))
    }
}

/// Received datagrams carry no alignment guarantee; archived data needs one.
fn aligned(data: &[u8]) -> AlignedVec {
    let mut buffer: AlignedVec = AlignedVec::with_capacity(data.len());
    buffer.extend_from_slice(data);
    buffer
}

pub(super) fn check_payload_size(
    network_id: NetworkId,
    payload: &[u8],
    limit: usize,
) -> Result<(), ReplicaError> {
    if payload.len() > limit {
        return Err(ReplicaError::PayloadTooLarge {
            object: network_id,
            size: payload.len(),
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_message_preserves_sections() {
        let message = ReliableMessage {
            frame: 42,
            removed: vec![NetworkId(3)],
            snapshots: vec![SnapshotPayload::new(
                NetworkId(5),
                ObjectKind::Behavior,
                vec![1, 2, 3],
            )],
            deltas: vec![ObjectPayload {
                network_id: NetworkId(6),
                payload: vec![9],
            }],
        };

        let bytes = message.serialize().unwrap();
        assert_eq!(ReliableMessage::deserialize(&bytes), Ok(message));
    }

    #[test]
    fn unknown_kind_survives_the_envelope() {
        let mut message = ReliableMessage::new(1);
        message.snapshots.push(SnapshotPayload {
            network_id: NetworkId(7),
            kind: 9,
            payload: Vec::new(),
        });

        let decoded = ReliableMessage::deserialize(&message.serialize().unwrap()).unwrap();
        assert_eq!(
            decoded.snapshots[0].object_kind(),
            Err(ReplicaError::UnknownObjectKind(9))
        );
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let mut message = UnreliableMessage::new(3);
        message.deltas.push(ObjectPayload {
            network_id: NetworkId(1),
            payload: vec![0u8; 40],
        });
        let bytes = message.serialize().unwrap();

        assert!(matches!(
            UnreliableMessage::deserialize(&bytes[..bytes.len() / 2]),
            Err(ReplicaError::MalformedMessage(_))
        ));
    }

    #[test]
    fn payload_limit_is_inclusive() {
        assert_eq!(check_payload_size(NetworkId(1), &[0; 32], 32), Ok(()));
        assert_eq!(
            check_payload_size(NetworkId(1), &[0; 33], 32),
            Err(ReplicaError::PayloadTooLarge {
                object: NetworkId(1),
                size: 33,
                limit: 32
            })
        );
    }
}
