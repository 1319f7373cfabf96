use bitflags::bitflags;

use super::object_core::{ObjectCore, PrefabRef, Transform};
use crate::error::ReplicaError;
use crate::net::{AbstractConnection, NetworkFrame, NetworkId, NetworkTime, WireReader, WireWriter};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NetworkCallbackFlags: u32 {
        const IS_RELEVANT_FOR_CLIENT = 1 << 0;
        const UPDATE_TRANSFORM_ON_SERVER = 1 << 1;
        const UNRELIABLE_DELTA = 1 << 2;
        const RELIABLE_DELTA = 1 << 3;
        const UNRELIABLE_FEEDBACK = 1 << 4;
        const INTERPOLATE_STATE = 1 << 5;
    }
}

/// View of the owning object handed to behavior callbacks.
pub struct OwnerContext<'a> {
    core: &'a mut ObjectCore,
}

impl<'a> OwnerContext<'a> {
    pub fn new(core: &'a mut ObjectCore) -> Self {
        Self { core }
    }

    pub fn network_id(&self) -> NetworkId {
        self.core.network_id()
    }

    pub fn parent(&self) -> Option<NetworkId> {
        self.core.parent()
    }

    pub fn transform(&self) -> &Transform {
        self.core.transform()
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.core.set_transform(transform);
    }
}

/// Capability unit attached to a `BehaviorNetworkObject`. Only the callbacks named in
/// `callback_mask` are invoked; everything else keeps its default no-op.
pub trait NetworkBehavior: Send {
    fn name(&self) -> &'static str;

    fn callback_mask(&self) -> NetworkCallbackFlags;

    fn set_network_object(&mut self, _owner: NetworkId) {}

    fn initialize_on_server(&mut self, _owner: &mut OwnerContext<'_>) {}

    fn write_snapshot(
        &mut self,
        _frame: NetworkFrame,
        _dest: &mut WireWriter,
        _owner: &OwnerContext<'_>,
    ) {
    }

    fn initialize_from_snapshot(
        &mut self,
        _frame: NetworkFrame,
        _src: &mut WireReader<'_>,
        _owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }

    fn is_relevant_for_client(&self, _connection: &dyn AbstractConnection) -> bool {
        true
    }

    fn update_transform_on_server(&mut self, _frame: NetworkFrame, _owner: &OwnerContext<'_>) {}

    fn interpolate_state(
        &mut self,
        _replica_time: NetworkTime,
        _input_time: NetworkTime,
        _owner: &mut OwnerContext<'_>,
    ) {
    }

    fn prepare_reliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_reliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _dest: &mut WireWriter,
        _owner: &OwnerContext<'_>,
    ) {
    }

    fn read_reliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _src: &mut WireReader<'_>,
        _owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }

    fn prepare_unreliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_unreliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _dest: &mut WireWriter,
        _owner: &OwnerContext<'_>,
    ) {
    }

    fn read_unreliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _src: &mut WireReader<'_>,
        _owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }

    fn prepare_unreliable_feedback(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_unreliable_feedback(
        &mut self,
        _frame: NetworkFrame,
        _dest: &mut WireWriter,
        _owner: &OwnerContext<'_>,
    ) {
    }

    fn read_unreliable_feedback(
        &mut self,
        _feedback_frame: NetworkFrame,
        _src: &mut WireReader<'_>,
        _owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }
}

/// Resolves a prefab reference into the behaviors the client attaches before reading the
/// behavior snapshot. Must produce the same behaviors, in the same order, as the server.
pub trait PrefabLoader: Send + Sync {
    fn load_behaviors(
        &self,
        prefab: &PrefabRef,
    ) -> Result<Vec<Box<dyn NetworkBehavior>>, ReplicaError>;
}
