pub mod config;
pub mod error;
pub mod net;
pub mod object;
pub mod replication;
pub mod trace;

pub use config::ReplicaConfig;
pub use error::{MAX_NUM_BEHAVIORS, ReplicaError};
pub use net::{
    AbstractConnection, ClientConnection, ConnectionId, MAX_VLE_VALUE, NetworkFrame, NetworkId,
    NetworkTime, WireReader, WireWriter,
};
pub use object::{
    BehaviorNetworkObject, InputReconciler, NUM_UPLOAD_ATTEMPTS, NetworkBehavior,
    NetworkCallbackFlags, NetworkObject, ObjectCore, ObjectKind, ObjectState, OwnerContext,
    PrefabLoader, PrefabRef, ReplicatedNetworkTransform, StaticNetworkObject, Transform,
};
pub use replication::{
    ClientReplica, ObjectPayload, ReliableMessage, ServerOutput, ServerReplicator,
    SnapshotPayload, UnreliableMessage,
};
pub use trace::{DEFAULT_TRACE_CAPACITY, Interpolate, NetworkValue};
