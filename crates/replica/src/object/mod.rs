mod behavior;
mod behavior_object;
mod object_core;
mod static_object;
mod transform;

pub use behavior::{NetworkBehavior, NetworkCallbackFlags, OwnerContext, PrefabLoader};
pub use behavior_object::BehaviorNetworkObject;
pub use object_core::{ObjectCore, ObjectKind, ObjectState, PrefabRef, Transform};
pub use static_object::StaticNetworkObject;
pub use transform::{InputReconciler, NUM_UPLOAD_ATTEMPTS, ReplicatedNetworkTransform};

use crate::error::ReplicaError;
use crate::net::{AbstractConnection, NetworkFrame, NetworkId, NetworkTime, WireReader, WireWriter};

/// Snapshot and delta lifecycle of a replicated object.
///
/// Server side: `initialize_on_server` once, then every tick `update_transform_on_server`,
/// `prepare_*_delta` and, when prepare returned true, `write_*_delta`. A snapshot is written
/// for every connection the object becomes relevant for.
///
/// Client side: `initialize_from_snapshot` once, then `read_*_delta` as packets arrive and
/// `interpolate_state` every rendered frame. Reliable and unreliable reads are independent;
/// applying only one of the streams leaves the object in a valid state.
pub trait NetworkObject: Send {
    fn kind(&self) -> ObjectKind;

    fn core(&self) -> &ObjectCore;

    fn core_mut(&mut self) -> &mut ObjectCore;

    fn callback_mask(&self) -> NetworkCallbackFlags {
        NetworkCallbackFlags::empty()
    }

    fn network_id(&self) -> NetworkId {
        self.core().network_id()
    }

    fn parent_network_id(&self) -> Option<NetworkId> {
        self.core().parent()
    }

    fn initialize_on_server(&mut self) -> Result<(), ReplicaError>;

    fn is_relevant_for_client(&self, _connection: &dyn AbstractConnection) -> bool {
        true
    }

    fn update_transform_on_server(&mut self, _frame: NetworkFrame) {}

    fn write_snapshot(&mut self, frame: NetworkFrame, dest: &mut WireWriter);

    fn prepare_reliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_reliable_delta(&mut self, _frame: NetworkFrame, _dest: &mut WireWriter) {}

    fn prepare_unreliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_unreliable_delta(&mut self, _frame: NetworkFrame, _dest: &mut WireWriter) {}

    fn read_unreliable_feedback(
        &mut self,
        _feedback_frame: NetworkFrame,
        _src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }

    fn initialize_from_snapshot(
        &mut self,
        frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError>;

    fn interpolate_state(&mut self, _replica_time: NetworkTime, _input_time: NetworkTime) {}

    fn read_reliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }

    fn read_unreliable_delta(
        &mut self,
        _frame: NetworkFrame,
        _src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        Ok(())
    }

    fn prepare_unreliable_feedback(&mut self, _frame: NetworkFrame) -> bool {
        false
    }

    fn write_unreliable_feedback(&mut self, _frame: NetworkFrame, _dest: &mut WireWriter) {}
}
