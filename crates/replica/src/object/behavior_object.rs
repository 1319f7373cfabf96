use std::sync::Arc;

use log::{debug, error, warn};

use super::NetworkObject;
use super::behavior::{NetworkBehavior, NetworkCallbackFlags, OwnerContext, PrefabLoader};
use super::object_core::{ObjectCore, ObjectKind, ObjectState, PrefabRef};
use super::static_object::StaticNetworkObject;
use crate::error::{MAX_NUM_BEHAVIORS, ReplicaError};
use crate::net::{AbstractConnection, NetworkFrame, NetworkId, NetworkTime, WireReader, WireWriter};

struct ConnectedNetworkBehavior {
    bit: u32,
    behavior: Box<dyn NetworkBehavior>,
    callback_mask: NetworkCallbackFlags,
}

impl ConnectedNetworkBehavior {
    fn in_mask(&self, mask: u32) -> bool {
        mask & (1 << self.bit) != 0
    }
}

/// Object composed of a fixed list of behaviors. Each behavior gets one bit of the
/// per-frame update masks, assigned in attachment order; payloads follow the mask in
/// ascending bit order.
pub struct BehaviorNetworkObject {
    base: StaticNetworkObject,
    behaviors: Vec<ConnectedNetworkBehavior>,
    behaviors_initialized: bool,
    callback_mask: NetworkCallbackFlags,
    invalidated: bool,
    prefab_loader: Option<Arc<dyn PrefabLoader>>,

    reliable_update_mask: u32,
    unreliable_update_mask: u32,
    unreliable_feedback_mask: u32,
}

impl BehaviorNetworkObject {
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            base: StaticNetworkObject::new(network_id),
            behaviors: Vec::new(),
            behaviors_initialized: false,
            callback_mask: NetworkCallbackFlags::empty(),
            invalidated: false,
            prefab_loader: None,
            reliable_update_mask: 0,
            unreliable_update_mask: 0,
            unreliable_feedback_mask: 0,
        }
    }

    pub fn with_prefab(network_id: NetworkId, prefab: PrefabRef) -> Self {
        let mut object = Self::new(network_id);
        object.base = StaticNetworkObject::with_prefab(network_id, prefab);
        object
    }

    /// Client-side constructor: behaviors are created from the replicated prefab reference.
    pub fn with_prefab_loader(network_id: NetworkId, loader: Arc<dyn PrefabLoader>) -> Self {
        let mut object = Self::new(network_id);
        object.prefab_loader = Some(loader);
        object
    }

    pub fn client_prefab(&self) -> Option<&PrefabRef> {
        self.base.client_prefab()
    }

    pub fn set_client_prefab(&mut self, prefab: Option<PrefabRef>) -> Result<(), ReplicaError> {
        self.base.set_client_prefab(prefab)
    }

    /// Attaches a behavior and returns the bit it will occupy.
    pub fn add_behavior(
        &mut self,
        behavior: Box<dyn NetworkBehavior>,
    ) -> Result<u32, ReplicaError> {
        let network_id = self.base.core.network_id();
        if self.behaviors_initialized || self.base.core.is_replicating() {
            let err = ReplicaError::BehaviorsLocked(network_id);
            error!("{}", err);
            return Err(err);
        }
        self.attach_behavior(behavior)
    }

    fn attach_behavior(&mut self, behavior: Box<dyn NetworkBehavior>) -> Result<u32, ReplicaError> {
        let network_id = self.base.core.network_id();
        if self.behaviors.len() >= MAX_NUM_BEHAVIORS {
            let err = ReplicaError::TooManyBehaviors(network_id);
            error!("{}", err);
            return Err(err);
        }

        let bit = self.behaviors.len() as u32;
        let callback_mask = behavior.callback_mask();
        self.behaviors.push(ConnectedNetworkBehavior {
            bit,
            behavior,
            callback_mask,
        });
        Ok(bit)
    }

    pub fn behavior_count(&self) -> usize {
        self.behaviors.len()
    }

    pub fn behavior_names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|c| c.behavior.name()).collect()
    }

    pub fn reliable_update_mask(&self) -> u32 {
        self.reliable_update_mask
    }

    pub fn unreliable_update_mask(&self) -> u32 {
        self.unreliable_update_mask
    }

    pub fn unreliable_feedback_mask(&self) -> u32 {
        self.unreliable_feedback_mask
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Disables every behavior without destroying the object. Behaviors stop producing
    /// deltas and incoming deltas are rejected.
    pub fn invalidate_behaviors(&mut self) {
        if self.invalidated {
            return;
        }
        warn!(
            "invalidating {} behaviors of object {}",
            self.behaviors.len(),
            self.base.core.network_id()
        );

        for connected in &mut self.behaviors {
            connected.callback_mask = NetworkCallbackFlags::empty();
        }
        self.callback_mask = NetworkCallbackFlags::empty();
        self.reliable_update_mask = 0;
        self.unreliable_update_mask = 0;
        self.unreliable_feedback_mask = 0;
        self.invalidated = true;
    }

    /// Assigns bits in attachment order and freezes the behavior set. Runs as part of
    /// initialization when not called earlier.
    pub fn initialize_behaviors(&mut self) -> Result<(), ReplicaError> {
        self.ensure_valid()?;
        let network_id = self.base.core.network_id();
        if self.behaviors.len() > MAX_NUM_BEHAVIORS {
            return Err(ReplicaError::TooManyBehaviors(network_id));
        }

        self.callback_mask = NetworkCallbackFlags::empty();
        for (index, connected) in self.behaviors.iter_mut().enumerate() {
            connected.bit = index as u32;
            connected.callback_mask = connected.behavior.callback_mask();
            connected.behavior.set_network_object(network_id);
            self.callback_mask |= connected.callback_mask;
        }
        self.behaviors_initialized = true;

        debug!(
            "object {} initialized behaviors {:?}",
            network_id,
            self.behavior_names()
        );
        Ok(())
    }

    fn load_behaviors_from_prefab(&mut self) -> Result<(), ReplicaError> {
        let Some(loader) = self.prefab_loader.clone() else {
            return Ok(());
        };
        let Some(prefab) = self.base.client_prefab().cloned() else {
            return Ok(());
        };
        for behavior in loader.load_behaviors(&prefab)? {
            self.attach_behavior(behavior)?;
        }
        Ok(())
    }

    fn ensure_valid(&self) -> Result<(), ReplicaError> {
        if self.invalidated {
            return Err(ReplicaError::Invalidated(self.base.core.network_id()));
        }
        Ok(())
    }

    /// Every set bit must name a behavior that handles `capability`.
    fn validate_mask(
        &self,
        mask: u32,
        capability: NetworkCallbackFlags,
    ) -> Result<(), ReplicaError> {
        let mut remaining = mask;
        while remaining != 0 {
            let bit = remaining.trailing_zeros();
            remaining &= remaining - 1;

            match self.behaviors.get(bit as usize) {
                Some(connected) if connected.callback_mask.contains(capability) => {}
                _ => {
                    return Err(ReplicaError::UnknownBehaviorBit {
                        object: self.base.core.network_id(),
                        bit,
                    });
                }
            }
        }
        Ok(())
    }

    fn collect_mask(
        &mut self,
        capability: NetworkCallbackFlags,
        mut prepare: impl FnMut(&mut dyn NetworkBehavior) -> bool,
    ) -> u32 {
        if !self.callback_mask.contains(capability) {
            return 0;
        }

        let mut mask = 0;
        for connected in &mut self.behaviors {
            if connected.callback_mask.contains(capability)
                && prepare(connected.behavior.as_mut())
            {
                mask |= 1 << connected.bit;
            }
        }
        mask
    }
}

impl NetworkObject for BehaviorNetworkObject {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Behavior
    }

    fn core(&self) -> &ObjectCore {
        &self.base.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.base.core
    }

    fn callback_mask(&self) -> NetworkCallbackFlags {
        self.callback_mask
    }

    fn initialize_on_server(&mut self) -> Result<(), ReplicaError> {
        if self.base.core.is_replicating() {
            return Err(ReplicaError::AlreadyInitialized(self.base.core.network_id()));
        }
        self.initialize_behaviors()?;
        self.base.initialize_on_server()?;

        let mut owner = OwnerContext::new(&mut self.base.core);
        for connected in &mut self.behaviors {
            connected.behavior.initialize_on_server(&mut owner);
        }
        Ok(())
    }

    fn is_relevant_for_client(&self, connection: &dyn AbstractConnection) -> bool {
        if !self.callback_mask.contains(NetworkCallbackFlags::IS_RELEVANT_FOR_CLIENT) {
            return true;
        }
        self.behaviors
            .iter()
            .filter(|c| c.callback_mask.contains(NetworkCallbackFlags::IS_RELEVANT_FOR_CLIENT))
            .all(|c| c.behavior.is_relevant_for_client(connection))
    }

    fn update_transform_on_server(&mut self, frame: NetworkFrame) {
        if !self.callback_mask.contains(NetworkCallbackFlags::UPDATE_TRANSFORM_ON_SERVER) {
            return;
        }

        let owner = OwnerContext::new(&mut self.base.core);
        for connected in &mut self.behaviors {
            if connected.callback_mask.contains(NetworkCallbackFlags::UPDATE_TRANSFORM_ON_SERVER) {
                connected.behavior.update_transform_on_server(frame, &owner);
            }
        }
    }

    fn write_snapshot(&mut self, frame: NetworkFrame, dest: &mut WireWriter) {
        self.base.write_snapshot(frame, dest);
        dest.write_vle(self.behaviors.len() as u32);

        let owner = OwnerContext::new(&mut self.base.core);
        for connected in &mut self.behaviors {
            connected.behavior.write_snapshot(frame, dest, &owner);
        }
    }

    fn prepare_reliable_delta(&mut self, frame: NetworkFrame) -> bool {
        let parent_changed = self.base.prepare_reliable_delta(frame);
        self.reliable_update_mask =
            self.collect_mask(NetworkCallbackFlags::RELIABLE_DELTA, |behavior| {
                behavior.prepare_reliable_delta(frame)
            });
        parent_changed || self.reliable_update_mask != 0
    }

    fn write_reliable_delta(&mut self, frame: NetworkFrame, dest: &mut WireWriter) {
        self.base.write_reliable_delta(frame, dest);
        dest.write_vle(self.reliable_update_mask);

        let mask = self.reliable_update_mask;
        let owner = OwnerContext::new(&mut self.base.core);
        for connected in self.behaviors.iter_mut().filter(|c| c.in_mask(mask)) {
            connected.behavior.write_reliable_delta(frame, dest, &owner);
        }
    }

    fn prepare_unreliable_delta(&mut self, frame: NetworkFrame) -> bool {
        self.base.mark_delta_synced();
        self.unreliable_update_mask =
            self.collect_mask(NetworkCallbackFlags::UNRELIABLE_DELTA, |behavior| {
                behavior.prepare_unreliable_delta(frame)
            });
        self.unreliable_update_mask != 0
    }

    fn write_unreliable_delta(&mut self, frame: NetworkFrame, dest: &mut WireWriter) {
        dest.write_vle(self.unreliable_update_mask);

        let mask = self.unreliable_update_mask;
        let owner = OwnerContext::new(&mut self.base.core);
        for connected in self.behaviors.iter_mut().filter(|c| c.in_mask(mask)) {
            connected.behavior.write_unreliable_delta(frame, dest, &owner);
        }
    }

    fn read_unreliable_feedback(
        &mut self,
        feedback_frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        self.ensure_valid()?;
        let mask = src.read_vle()?;
        self.validate_mask(mask, NetworkCallbackFlags::UNRELIABLE_FEEDBACK)?;

        let mut owner = OwnerContext::new(&mut self.base.core);
        for connected in self.behaviors.iter_mut().filter(|c| c.in_mask(mask)) {
            connected.behavior.read_unreliable_feedback(feedback_frame, src, &mut owner)?;
        }
        Ok(())
    }

    fn initialize_from_snapshot(
        &mut self,
        frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        self.ensure_valid()?;
        self.base.begin_client_initialization()?;
        self.base.read_base_snapshot(src)?;

        if self.behaviors.is_empty() {
            self.load_behaviors_from_prefab()?;
        }

        let received = src.read_vle()? as usize;
        if received != self.behaviors.len() {
            return Err(ReplicaError::BehaviorCountMismatch {
                object: self.base.core.network_id(),
                expected: self.behaviors.len(),
                received,
            });
        }
        self.initialize_behaviors()?;

        let mut owner = OwnerContext::new(&mut self.base.core);
        for connected in &mut self.behaviors {
            connected.behavior.initialize_from_snapshot(frame, src, &mut owner)?;
        }

        self.base.core.set_state(ObjectState::ClientSynced);
        Ok(())
    }

    fn interpolate_state(&mut self, replica_time: NetworkTime, input_time: NetworkTime) {
        if !self.callback_mask.contains(NetworkCallbackFlags::INTERPOLATE_STATE) {
            return;
        }

        let mut owner = OwnerContext::new(&mut self.base.core);
        for connected in &mut self.behaviors {
            if connected.callback_mask.contains(NetworkCallbackFlags::INTERPOLATE_STATE) {
                connected.behavior.interpolate_state(replica_time, input_time, &mut owner);
            }
        }
    }

    fn read_reliable_delta(
        &mut self,
        frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        self.ensure_valid()?;
        self.base.read_reliable_delta(frame, src)?;
        let mask = src.read_vle()?;
        self.validate_mask(mask, NetworkCallbackFlags::RELIABLE_DELTA)?;

        let mut owner = OwnerContext::new(&mut self.base.core);
        for connected in self.behaviors.iter_mut().filter(|c| c.in_mask(mask)) {
            connected.behavior.read_reliable_delta(frame, src, &mut owner)?;
        }
        Ok(())
    }

    fn read_unreliable_delta(
        &mut self,
        frame: NetworkFrame,
        src: &mut WireReader<'_>,
    ) -> Result<(), ReplicaError> {
        self.ensure_valid()?;
        let mask = src.read_vle()?;
        self.validate_mask(mask, NetworkCallbackFlags::UNRELIABLE_DELTA)?;

        let mut owner = OwnerContext::new(&mut self.base.core);
        for connected in self.behaviors.iter_mut().filter(|c| c.in_mask(mask)) {
            connected.behavior.read_unreliable_delta(frame, src, &mut owner)?;
        }
        Ok(())
    }

    fn prepare_unreliable_feedback(&mut self, frame: NetworkFrame) -> bool {
        self.unreliable_feedback_mask =
            self.collect_mask(NetworkCallbackFlags::UNRELIABLE_FEEDBACK, |behavior| {
                behavior.prepare_unreliable_feedback(frame)
            });
        self.unreliable_feedback_mask != 0
    }

    fn write_unreliable_feedback(&mut self, frame: NetworkFrame, dest: &mut WireWriter) {
        dest.write_vle(self.unreliable_feedback_mask);

        let mask = self.unreliable_feedback_mask;
        let owner = OwnerContext::new(&mut self.base.core);
        for connected in self.behaviors.iter_mut().filter(|c| c.in_mask(mask)) {
            connected.behavior.write_unreliable_feedback(frame, dest, &owner);
        }
    }
}
