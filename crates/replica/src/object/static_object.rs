use log::{debug, error};

use super::NetworkObject;
use super::object_core::{ObjectCore, ObjectKind, ObjectState, PrefabRef, Transform};
use crate::error::ReplicaError;
use crate::net::{NetworkFrame, NetworkId, WireReader, WireWriter};

/// Object instantiated on the client from a prefab and never updated afterwards, except
/// for its position in the object hierarchy.
#[derive(Debug)]
pub struct StaticNetworkObject {
    pub(super) core: ObjectCore,
    client_prefab: Option<PrefabRef>,
    latest_sent_parent: Option<NetworkId>,
}

impl StaticNetworkObject {
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            core: ObjectCore::new(network_id),
            client_prefab: None,
            latest_sent_parent: None,
        }
    }

    pub fn with_prefab(network_id: NetworkId, prefab: PrefabRef) -> Self {
        let mut object = Self::new(network_id);
        object.client_prefab = Some(prefab);
        object
    }

    pub fn client_prefab(&self) -> Option<&PrefabRef> {
        self.client_prefab.as_ref()
    }

    pub fn set_client_prefab(&mut self, prefab: Option<PrefabRef>) -> Result<(), ReplicaError> {
        if self.core.is_replicating() {
            let err = ReplicaError::PrefabLocked(self.core.network_id());
            error!("{}", err);
            return Err(err);
        }
        self.client_prefab = prefab;
        Ok(())
    }

    pub(super) fn begin_client_initialization(&mut self) -> Result<(), ReplicaError> {
        if self.core.is_replicating() {
            return Err(ReplicaError::AlreadyInitialized(self.core.network_id()));
        }
        self.core.set_state(ObjectState::ClientInitializing);
        Ok(())
    }

    pub(super) fn read_base_snapshot(
        &mut self,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        let parent = src.read_network_id()?;
        let prefab = src.read_string()?;
        let transform = Transform {
            position: src.read_vec3()?,
            rotation: src.read_quat()?,
            scale: src.read_vec3()?,
        };

        self.core.set_parent(parent);
        self.client_prefab = (!prefab.is_empty()).then(|| PrefabRef::new(prefab));
        self.core.set_transform(transform);
        self.latest_sent_parent = self.core.parent();
        Ok(())
    }

    pub(super) fn mark_delta_synced(&mut self) {
        if self.core.state() == ObjectState::SnapshotSent {
            self.core.set_state(ObjectState::DeltaSynced);
        }
    }
}

impl NetworkObject for StaticNetworkObject {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Static
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    fn initialize_on_server(&mut self) -> Result<(), ReplicaError> {
        if self.core.is_replicating() {
            return Err(ReplicaError::AlreadyInitialized(self.core.network_id()));
        }
        self.latest_sent_parent = self.core.parent();
        self.core.set_state(ObjectState::ServerInitialized);
        Ok(())
    }

    fn write_snapshot(&mut self, _frame: NetworkFrame, dest: &mut WireWriter) {
        let transform = *self.core.transform();

        dest.write_network_id(self.core.parent());
        dest.write_str(self.client_prefab.as_ref().map_or("", PrefabRef::name));
        dest.write_vec3(transform.position);
        dest.write_quat(transform.rotation);
        dest.write_vec3(transform.scale);

        if self.core.state() == ObjectState::ServerInitialized {
            self.core.set_state(ObjectState::SnapshotSent);
        }
    }

    fn prepare_reliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        self.mark_delta_synced();

        let parent = self.core.parent();
        if parent == self.latest_sent_parent {
            return false;
        }

        debug!(
            "object {} parent changed {:?} -> {:?}",
            self.core.network_id(),
            self.latest_sent_parent,
            parent
        );
        self.latest_sent_parent = parent;
        true
    }

    fn write_reliable_delta(&mut self, _frame: NetworkFrame, dest: &mut WireWriter) {
        dest.write_network_id(self.latest_sent_parent);
    }

    fn prepare_unreliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        self.mark_delta_synced();
        false
    }

    fn initialize_from_snapshot(
        &mut self,
        _frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        self.begin_client_initialization()?;
        self.read_base_snapshot(src)?;
        self.core.set_state(ObjectState::ClientSynced);
        Ok(())
    }

    fn read_reliable_delta(
        &mut self,
        _frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        let parent = src.read_network_id()?;
        self.core.set_parent(parent);
        self.latest_sent_parent = self.core.parent();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;

    fn snapshot_of(object: &mut StaticNetworkObject) -> Vec<u8> {
        let mut writer = WireWriter::new();
        object.write_snapshot(1, &mut writer);
        writer.as_slice().to_vec()
    }

    #[test]
    fn prefab_is_locked_after_initialization() {
        let mut object = StaticNetworkObject::new(NetworkId(1));
        object.set_client_prefab(Some(PrefabRef::new("Crate.xml"))).unwrap();
        object.initialize_on_server().unwrap();

        assert_eq!(
            object.set_client_prefab(Some(PrefabRef::new("Barrel.xml"))),
            Err(ReplicaError::PrefabLocked(NetworkId(1)))
        );
        assert_eq!(object.client_prefab(), Some(&PrefabRef::new("Crate.xml")));
    }

    #[test]
    fn reliable_delta_only_on_parent_change() {
        let mut object = StaticNetworkObject::new(NetworkId(4));
        object.core_mut().set_parent(Some(NetworkId(1)));
        object.initialize_on_server().unwrap();

        assert!(!object.prepare_reliable_delta(1));
        assert!(!object.prepare_reliable_delta(2));

        object.core_mut().set_parent(Some(NetworkId(2)));
        assert!(object.prepare_reliable_delta(3));
        assert!(!object.prepare_reliable_delta(4));
        assert!(!object.prepare_reliable_delta(5));

        object.core_mut().set_parent(None);
        assert!(object.prepare_reliable_delta(6));
        assert!(!object.prepare_reliable_delta(7));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut server =
            StaticNetworkObject::with_prefab(NetworkId(9), PrefabRef::new("Props/Lamp.xml"));
        server.core_mut().set_parent(Some(NetworkId(3)));
        server.core_mut().set_transform(Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_z(0.5),
            scale: Vec3::splat(2.0),
        });
        server.initialize_on_server().unwrap();
        let bytes = snapshot_of(&mut server);
        assert_eq!(server.core().state(), ObjectState::SnapshotSent);

        let mut client = StaticNetworkObject::new(NetworkId(9));
        client.initialize_from_snapshot(1, &mut WireReader::new(&bytes)).unwrap();

        assert_eq!(client.core().state(), ObjectState::ClientSynced);
        assert_eq!(client.client_prefab(), server.client_prefab());
        assert_eq!(client.core().parent(), Some(NetworkId(3)));
        let transform = client.core().transform();
        assert_eq!(transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(transform.scale, Vec3::splat(2.0));
        assert!(transform.rotation.angle_between(Quat::from_rotation_z(0.5)) < 1e-4);
    }

    #[test]
    fn reliable_delta_moves_client_in_hierarchy() {
        let mut server = StaticNetworkObject::new(NetworkId(2));
        server.initialize_on_server().unwrap();
        let bytes = snapshot_of(&mut server);

        let mut client = StaticNetworkObject::new(NetworkId(2));
        client.initialize_from_snapshot(1, &mut WireReader::new(&bytes)).unwrap();
        assert_eq!(client.core().parent(), None);

        server.core_mut().set_parent(Some(NetworkId(7)));
        assert!(server.prepare_reliable_delta(2));
        let mut writer = WireWriter::new();
        server.write_reliable_delta(2, &mut writer);

        client
            .read_reliable_delta(2, &mut WireReader::new(writer.as_slice()))
            .unwrap();
        assert_eq!(client.core().parent(), Some(NetworkId(7)));
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let mut server = StaticNetworkObject::with_prefab(NetworkId(5), PrefabRef::new("Tree.xml"));
        server.initialize_on_server().unwrap();
        let bytes = snapshot_of(&mut server);

        let mut client = StaticNetworkObject::new(NetworkId(5));
        let truncated = &bytes[..bytes.len() - 3];
        let result = client.initialize_from_snapshot(1, &mut WireReader::new(truncated));
        assert!(matches!(result, Err(ReplicaError::UnexpectedEof { .. })));
        assert_eq!(client.core().state(), ObjectState::ClientInitializing);
    }
}
