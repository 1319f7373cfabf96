use std::fmt;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::ReplicaError;
use crate::net::NetworkId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }
}

/// Name of the prefab resource the client instantiates for an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefabRef(String);

impl PrefabRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrefabRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    Unbound,
    ServerInitialized,
    SnapshotSent,
    DeltaSynced,
    ClientInitializing,
    ClientSynced,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    Static = 0,
    Behavior = 1,
}

impl TryFrom<u8> for ObjectKind {
    type Error = ReplicaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Static),
            1 => Ok(Self::Behavior),
            other => Err(ReplicaError::UnknownObjectKind(other)),
        }
    }
}

/// State shared by every replicated object: identity, hierarchy and world transform.
#[derive(Debug, Clone)]
pub struct ObjectCore {
    network_id: NetworkId,
    parent: Option<NetworkId>,
    transform: Transform,
    state: ObjectState,
}

impl ObjectCore {
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            network_id,
            parent: None,
            transform: Transform::default(),
            state: ObjectState::Unbound,
        }
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn parent(&self) -> Option<NetworkId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<NetworkId>) {
        self.parent = parent.filter(|id| id.is_valid() && *id != self.network_id);
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_world_position(&mut self, position: Vec3) {
        self.transform.position = position;
    }

    pub fn set_world_rotation(&mut self, rotation: Quat) {
        self.transform.rotation = rotation;
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn set_state(&mut self, state: ObjectState) {
        self.state = state;
    }

    /// True once the object has been handed to a replicator on either side.
    pub fn is_replicating(&self) -> bool {
        self.state != ObjectState::Unbound
    }
}
