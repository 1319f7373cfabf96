use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use log::{debug, error, info, trace, warn};

use super::message::{
    ObjectPayload, ReliableMessage, SnapshotPayload, UnreliableMessage, check_payload_size,
};
use crate::config::ReplicaConfig;
use crate::error::ReplicaError;
use crate::net::{AbstractConnection, ConnectionId, NetworkFrame, NetworkId, WireReader, WireWriter};
use crate::object::{NetworkObject, ObjectState};

struct ConnectionState {
    connection: Box<dyn AbstractConnection>,
    replicated: BTreeSet<NetworkId>,
    pending_removals: Vec<NetworkId>,
}

/// Messages produced for one connection by a single `ServerReplicator::step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOutput {
    pub connection: ConnectionId,
    pub reliable: Option<Bytes>,
    pub unreliable: Option<Bytes>,
}

/// Owns the authoritative objects and decides, per connection and tick, which snapshots,
/// removals and deltas go out.
pub struct ServerReplicator {
    config: ReplicaConfig,
    objects: BTreeMap<NetworkId, Box<dyn NetworkObject>>,
    connections: BTreeMap<ConnectionId, ConnectionState>,
    current_frame: NetworkFrame,
}

impl ServerReplicator {
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            config,
            objects: BTreeMap::new(),
            connections: BTreeMap::new(),
            current_frame: 0,
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn current_frame(&self) -> NetworkFrame {
        self.current_frame
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn add_object(
        &mut self,
        mut object: Box<dyn NetworkObject>,
    ) -> Result<NetworkId, ReplicaError> {
        let network_id = object.network_id();
        if !network_id.is_valid() || self.objects.contains_key(&network_id) {
            let err = ReplicaError::DuplicateNetworkId(network_id);
            error!("{}", err);
            return Err(err);
        }

        object.initialize_on_server()?;
        debug!("added object {} ({:?})", network_id, object.kind());
        self.objects.insert(network_id, object);
        Ok(network_id)
    }

    /// Unregisters the object and schedules its removal on every client that has it.
    pub fn remove_object(&mut self, network_id: NetworkId) -> Option<Box<dyn NetworkObject>> {
        let mut object = self.objects.remove(&network_id)?;
        object.core_mut().set_state(ObjectState::Destroyed);

        for state in self.connections.values_mut() {
            if state.replicated.remove(&network_id) {
                state.pending_removals.push(network_id);
            }
        }
        debug!("removed object {}", network_id);
        Some(object)
    }

    pub fn object(&self, network_id: NetworkId) -> Option<&dyn NetworkObject> {
        self.objects.get(&network_id).map(|object| object.as_ref())
    }

    pub fn object_mut(
        &mut self,
        network_id: NetworkId,
    ) -> Option<&mut (dyn NetworkObject + 'static)> {
        self.objects.get_mut(&network_id).map(|object| object.as_mut())
    }

    pub fn object_ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.objects.keys().copied()
    }

    pub fn add_connection(
        &mut self,
        connection: Box<dyn AbstractConnection>,
    ) -> Result<(), ReplicaError> {
        let id = connection.connection_id();
        if self.connections.contains_key(&id) {
            return Err(ReplicaError::DuplicateConnection(id));
        }

        info!("{} ({}) joined replication", id, connection.name());
        self.connections.insert(
            id,
            ConnectionState {
                connection,
                replicated: BTreeSet::new(),
                pending_removals: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            info!("{} left replication", id);
        }
        removed
    }

    pub fn is_replicated_to(&self, id: ConnectionId, network_id: NetworkId) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|state| state.replicated.contains(&network_id))
    }

    /// Forgets that the client has the object so the next step sends a fresh snapshot.
    pub fn request_resync(
        &mut self,
        id: ConnectionId,
        network_id: NetworkId,
    ) -> Result<(), ReplicaError> {
        let state = self
            .connections
            .get_mut(&id)
            .ok_or(ReplicaError::UnknownConnection(id))?;
        if state.replicated.remove(&network_id) {
            warn!("{} requested resync of object {}", id, network_id);
        }
        Ok(())
    }

    /// Applies feedback received from a client. Payloads for objects the client does not
    /// own a replica of are ignored; a malformed payload only affects its object.
    pub fn process_feedback(&mut self, id: ConnectionId, data: &[u8]) -> Result<(), ReplicaError> {
        let state = self.connections.get(&id).ok_or(ReplicaError::UnknownConnection(id))?;
        let message = UnreliableMessage::deserialize(data)?;

        for delta in &message.deltas {
            if !state.replicated.contains(&delta.network_id) {
                trace!("{} sent feedback for unreplicated object {}", id, delta.network_id);
                continue;
            }
            let limit = self.config.max_payload_size;
            if let Err(err) = check_payload_size(delta.network_id, &delta.payload, limit) {
                warn!("dropping feedback from {}: {}", id, err);
                continue;
            }
            let Some(object) = self.objects.get_mut(&delta.network_id) else {
                continue;
            };

            let mut reader = WireReader::new(&delta.payload);
            if let Err(err) = object.read_unreliable_feedback(message.frame, &mut reader) {
                warn!("dropping feedback from {} for object {}: {}", id, delta.network_id, err);
            }
        }
        Ok(())
    }

    pub fn step(&mut self, frame: NetworkFrame) -> Vec<ServerOutput> {
        self.current_frame = frame;

        for object in self.objects.values_mut() {
            object.update_transform_on_server(frame);
        }

        let limit = self.config.max_payload_size;
        let mut outputs = Vec::with_capacity(self.connections.len());
        let mut snapshotted = BTreeSet::new();
        let mut reliable_messages = BTreeMap::new();

        for (&id, state) in &mut self.connections {
            let mut message = ReliableMessage::new(frame);
            message.removed.append(&mut state.pending_removals);
            snapshotted.clear();

            for (&network_id, object) in &mut self.objects {
                let relevant = object.is_relevant_for_client(state.connection.as_ref());
                let replicated = state.replicated.contains(&network_id);

                if relevant && !replicated {
                    let mut writer = WireWriter::new();
                    object.write_snapshot(frame, &mut writer);
                    let Some(payload) = outgoing_payload(network_id, writer, limit) else {
                        continue;
                    };
                    message
                        .snapshots
                        .push(SnapshotPayload::new(network_id, object.kind(), payload));
                    state.replicated.insert(network_id);
                    snapshotted.insert(network_id);
                } else if !relevant && replicated {
                    message.removed.push(network_id);
                    state.replicated.remove(&network_id);
                }
            }

            reliable_messages.insert(id, (message, snapshotted.clone()));
        }

        let mut reliable_deltas = BTreeMap::new();
        let mut unreliable_deltas = BTreeMap::new();
        for (&network_id, object) in &mut self.objects {
            if object.prepare_reliable_delta(frame) {
                let mut writer = WireWriter::new();
                object.write_reliable_delta(frame, &mut writer);
                if let Some(payload) = outgoing_payload(network_id, writer, limit) {
                    reliable_deltas.insert(network_id, payload);
                }
            }
            if object.prepare_unreliable_delta(frame) {
                let mut writer = WireWriter::new();
                object.write_unreliable_delta(frame, &mut writer);
                if let Some(payload) = outgoing_payload(network_id, writer, limit) {
                    unreliable_deltas.insert(network_id, payload);
                }
            }
        }

        for (id, (mut message, snapshotted)) in reliable_messages {
            let Some(state) = self.connections.get(&id) else {
                continue;
            };

            message.deltas = collect_deltas(&reliable_deltas, |network_id| {
                state.replicated.contains(&network_id) && !snapshotted.contains(&network_id)
            });
            let mut unreliable = UnreliableMessage::new(frame);
            unreliable.deltas = collect_deltas(&unreliable_deltas, |network_id| {
                state.replicated.contains(&network_id)
            });

            trace!(
                "frame {} -> {}: {} snapshots, {} removals, {} reliable, {} unreliable",
                frame,
                id,
                message.snapshots.len(),
                message.removed.len(),
                message.deltas.len(),
                unreliable.deltas.len()
            );

            outputs.push(ServerOutput {
                connection: id,
                reliable: (!message.is_empty())
                    .then(|| message.serialize())
                    .and_then(|result| encoded(id, result)),
                unreliable: (!unreliable.is_empty())
                    .then(|| unreliable.serialize())
                    .and_then(|result| encoded(id, result)),
            });
        }
        outputs
    }
}

/// Receivers reject payloads over the limit, so they are never sent.
fn outgoing_payload(network_id: NetworkId, writer: WireWriter, limit: usize) -> Option<Vec<u8>> {
    match check_payload_size(network_id, writer.as_slice(), limit) {
        Ok(()) => Some(writer.as_slice().to_vec()),
        Err(err) => {
            error!("withholding payload: {}", err);
            None
        }
    }
}

fn encoded(id: ConnectionId, result: Result<Bytes, ReplicaError>) -> Option<Bytes> {
    result
        .inspect_err(|err| error!("dropping message for {}: {}", id, err))
        .ok()
}

fn collect_deltas(
    deltas: &BTreeMap<NetworkId, Vec<u8>>,
    mut include: impl FnMut(NetworkId) -> bool,
) -> Vec<ObjectPayload> {
    deltas
        .iter()
        .filter(|(network_id, _)| include(**network_id))
        .map(|(network_id, payload)| ObjectPayload {
            network_id: *network_id,
            payload: payload.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ClientConnection;
    use crate::object::{PrefabRef, StaticNetworkObject};

    fn decode(output: &ServerOutput) -> ReliableMessage {
        ReliableMessage::deserialize(output.reliable.as_ref().unwrap()).unwrap()
    }

    fn replicator_with_client() -> ServerReplicator {
        let mut server = ServerReplicator::new(ReplicaConfig::default());
        server
            .add_connection(Box::new(ClientConnection::new(1, "alice")))
            .unwrap();
        server
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut server = replicator_with_client();
        server
            .add_object(Box::new(StaticNetworkObject::new(NetworkId(1))))
            .unwrap();

        let result = server.add_object(Box::new(StaticNetworkObject::new(NetworkId(1))));
        assert_eq!(result.err(), Some(ReplicaError::DuplicateNetworkId(NetworkId(1))));
        assert_eq!(server.object_count(), 1);
    }

    #[test]
    fn snapshot_is_sent_once_per_connection() {
        let mut server = replicator_with_client();
        server
            .add_object(Box::new(StaticNetworkObject::new(NetworkId(1))))
            .unwrap();

        let first = server.step(1);
        let message = decode(&first[0]);
        assert_eq!(message.snapshots.len(), 1);
        assert!(server.is_replicated_to(ConnectionId(1), NetworkId(1)));

        let second = server.step(2);
        assert_eq!(second[0].reliable, None);
        assert_eq!(second[0].unreliable, None);
    }

    #[test]
    fn removal_reaches_only_connections_that_had_the_object() {
        let mut server = replicator_with_client();
        server
            .add_object(Box::new(StaticNetworkObject::new(NetworkId(4))))
            .unwrap();
        server.step(1);
        server
            .add_connection(Box::new(ClientConnection::new(2, "bob")))
            .unwrap();

        assert!(server.remove_object(NetworkId(4)).is_some());
        let outputs = server.step(2);

        let alice = decode(&outputs[0]);
        assert_eq!(alice.removed, vec![NetworkId(4)]);
        assert_eq!(outputs[1].reliable, None);
    }

    #[test]
    fn oversized_snapshot_is_withheld() {
        let mut server = ServerReplicator::new(ReplicaConfig {
            max_payload_size: 64,
            ..Default::default()
        });
        server
            .add_connection(Box::new(ClientConnection::new(1, "alice")))
            .unwrap();
        let long_name = "Props/".to_owned() + &"x".repeat(80);
        server
            .add_object(Box::new(StaticNetworkObject::with_prefab(
                NetworkId(1),
                PrefabRef::new(long_name),
            )))
            .unwrap();
        server
            .add_object(Box::new(StaticNetworkObject::new(NetworkId(2))))
            .unwrap();

        let message = decode(&server.step(1)[0]);
        assert_eq!(message.snapshots.len(), 1);
        assert_eq!(message.snapshots[0].network_id, NetworkId(2));
        assert!(!server.is_replicated_to(ConnectionId(1), NetworkId(1)));
    }

    #[test]
    fn resync_resends_snapshot() {
        let mut server = replicator_with_client();
        server
            .add_object(Box::new(StaticNetworkObject::new(NetworkId(2))))
            .unwrap();
        server.step(1);

        server.request_resync(ConnectionId(1), NetworkId(2)).unwrap();
        let outputs = server.step(2);
        let message = decode(&outputs[0]);
        assert_eq!(message.snapshots[0].network_id, NetworkId(2));

        assert_eq!(
            server.request_resync(ConnectionId(9), NetworkId(2)),
            Err(ReplicaError::UnknownConnection(ConnectionId(9)))
        );
    }
}
