use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, trace, warn};

use super::message::{
    ObjectPayload, ReliableMessage, SnapshotPayload, UnreliableMessage, check_payload_size,
};
use crate::config::ReplicaConfig;
use crate::error::ReplicaError;
use crate::net::{NetworkFrame, NetworkId, NetworkTime, WireReader, WireWriter};
use crate::object::{
    BehaviorNetworkObject, NetworkObject, ObjectKind, ObjectState, PrefabLoader,
    StaticNetworkObject,
};

/// Client-side mirror of the server's objects, built from snapshots and kept current by
/// deltas.
pub struct ClientReplica {
    config: ReplicaConfig,
    prefab_loader: Arc<dyn PrefabLoader>,
    objects: BTreeMap<NetworkId, Box<dyn NetworkObject>>,
    latest_frame: Option<NetworkFrame>,
    resync_requests: BTreeSet<NetworkId>,
}

impl ClientReplica {
    pub fn new(config: ReplicaConfig, prefab_loader: Arc<dyn PrefabLoader>) -> Self {
        Self {
            config,
            prefab_loader,
            objects: BTreeMap::new(),
            latest_frame: None,
            resync_requests: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn latest_frame(&self) -> Option<NetworkFrame> {
        self.latest_frame
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
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

    /// Objects dropped after a protocol error, waiting for a fresh snapshot.
    pub fn take_resync_requests(&mut self) -> Vec<NetworkId> {
        std::mem::take(&mut self.resync_requests).into_iter().collect()
    }

    /// Fails only when the envelope itself cannot be decoded. Errors inside a single
    /// object's entry drop that object and queue a resync request for it.
    pub fn process_reliable(&mut self, data: &[u8]) -> Result<(), ReplicaError> {
        let message = ReliableMessage::deserialize(data)?;
        self.observe_frame(message.frame);

        for network_id in &message.removed {
            if let Some(mut object) = self.objects.remove(network_id) {
                object.core_mut().set_state(ObjectState::Destroyed);
                debug!("object {} removed by server", network_id);
            }
            self.resync_requests.remove(network_id);
        }

        for snapshot in &message.snapshots {
            self.apply_snapshot(message.frame, snapshot);
        }

        for delta in &message.deltas {
            self.apply_delta(message.frame, delta, |object, frame, reader| {
                object.read_reliable_delta(frame, reader)
            });
        }
        Ok(())
    }

    /// Unreliable deltas for objects this client does not have are dropped silently; they
    /// may have arrived ahead of the snapshot.
    pub fn process_unreliable(&mut self, data: &[u8]) -> Result<(), ReplicaError> {
        let message = UnreliableMessage::deserialize(data)?;
        self.observe_frame(message.frame);

        for delta in &message.deltas {
            self.apply_delta(message.frame, delta, |object, frame, reader| {
                object.read_unreliable_delta(frame, reader)
            });
        }
        Ok(())
    }

    /// Render time trailing `input_time` by the configured interpolation delay.
    pub fn replica_time(&self, input_time: NetworkTime) -> NetworkTime {
        input_time.offset(-self.config.interpolation_delay_frames)
    }

    pub fn interpolate(&mut self, input_time: NetworkTime) {
        let replica_time = self.replica_time(input_time);
        for object in self.objects.values_mut() {
            object.interpolate_state(replica_time, input_time);
        }
    }

    /// Collects feedback from every object that has some for `frame`.
    pub fn write_feedback(&mut self, frame: NetworkFrame) -> Option<Bytes> {
        let mut message = UnreliableMessage::new(frame);
        for (&network_id, object) in &mut self.objects {
            if object.prepare_unreliable_feedback(frame) {
                let mut writer = WireWriter::new();
                object.write_unreliable_feedback(frame, &mut writer);
                message.deltas.push(ObjectPayload {
                    network_id,
                    payload: writer.as_slice().to_vec(),
                });
            }
        }
        if message.is_empty() {
            return None;
        }

        message
            .serialize()
            .inspect_err(|err| error!("failed to encode feedback @{}: {}", frame, err))
            .ok()
    }

    fn observe_frame(&mut self, frame: NetworkFrame) {
        if self.latest_frame.is_none_or(|latest| frame > latest) {
            self.latest_frame = Some(frame);
        }
    }

    fn instantiate(&self, network_id: NetworkId, kind: ObjectKind) -> Box<dyn NetworkObject> {
        match kind {
            ObjectKind::Static => Box::new(StaticNetworkObject::new(network_id)),
            ObjectKind::Behavior => Box::new(BehaviorNetworkObject::with_prefab_loader(
                network_id,
                Arc::clone(&self.prefab_loader),
            )),
        }
    }

    fn apply_snapshot(&mut self, frame: NetworkFrame, snapshot: &SnapshotPayload) {
        let network_id = snapshot.network_id;
        match self.decode_snapshot(frame, snapshot) {
            Ok(object) => {
                trace!("object {} created from snapshot @{}", network_id, frame);
                self.resync_requests.remove(&network_id);
                self.objects.insert(network_id, object);
            }
            Err(err) => self.drop_for_resync(network_id, err),
        }
    }

    fn decode_snapshot(
        &self,
        frame: NetworkFrame,
        snapshot: &SnapshotPayload,
    ) -> Result<Box<dyn NetworkObject>, ReplicaError> {
        let network_id = snapshot.network_id;
        check_payload_size(network_id, &snapshot.payload, self.config.max_payload_size)?;

        let mut object = self.instantiate(network_id, snapshot.object_kind()?);
        let mut reader = WireReader::new(&snapshot.payload);
        object.initialize_from_snapshot(frame, &mut reader)?;
        ensure_consumed(network_id, &reader)?;
        Ok(object)
    }

    fn apply_delta(
        &mut self,
        frame: NetworkFrame,
        delta: &ObjectPayload,
        read: impl FnOnce(
            &mut dyn NetworkObject,
            NetworkFrame,
            &mut WireReader<'_>,
        ) -> Result<(), ReplicaError>,
    ) {
        let network_id = delta.network_id;
        let limit = self.config.max_payload_size;
        let Some(object) = self.objects.get_mut(&network_id) else {
            trace!("delta for unknown object {} ignored", network_id);
            return;
        };

        let mut reader = WireReader::new(&delta.payload);
        let result = check_payload_size(network_id, &delta.payload, limit)
            .and_then(|()| read(object.as_mut(), frame, &mut reader))
            .and_then(|()| ensure_consumed(network_id, &reader));
        if let Err(err) = result {
            self.drop_for_resync(network_id, err);
        }
    }

    fn drop_for_resync(&mut self, network_id: NetworkId, err: ReplicaError) {
        warn!("dropping object {} and requesting resync: {}", network_id, err);
        if let Some(mut object) = self.objects.remove(&network_id) {
            object.core_mut().set_state(ObjectState::Destroyed);
        }
        self.resync_requests.insert(network_id);
    }
}

fn ensure_consumed(network_id: NetworkId, reader: &WireReader<'_>) -> Result<(), ReplicaError> {
    if !reader.is_empty() {
        return Err(ReplicaError::TrailingBytes {
            object: network_id,
            remaining: reader.remaining(),
        });
    }
    Ok(())
}
