use glam::{Quat, Vec3};
use log::trace;
use replica::{
    ConnectionId, NetworkBehavior, NetworkCallbackFlags, NetworkFrame, NetworkId, OwnerContext,
    PrefabLoader, PrefabRef, ReplicaError, ReplicatedNetworkTransform, WireReader, WireWriter,
};

pub const DRONE_PREFAB: &str = "Objects/Drone.xml";
pub const CRATE_PREFAB: &str = "Objects/Crate.xml";

/// The client that steers a drone. Every client replicates every drone.
pub fn drone_owner(network_id: NetworkId, clients: u32) -> ConnectionId {
    ConnectionId(network_id.0 % clients.max(1))
}

/// Client-reported aim direction, sent back to the server as unreliable feedback. The
/// server turns the owner to face the newest aim it has seen. Only the client returned
/// by `drone_owner` reports aim, so a drone never receives competing inputs.
#[derive(Default)]
pub struct AimFeedback {
    local: Option<ConnectionId>,
    clients: u32,
    steering: bool,
    latest_feedback_frame: Option<NetworkFrame>,
}

impl AimFeedback {
    pub fn on_client(local: ConnectionId, clients: u32) -> Self {
        Self {
            local: Some(local),
            clients,
            ..Default::default()
        }
    }
}

impl NetworkBehavior for AimFeedback {
    fn name(&self) -> &'static str {
        "AimFeedback"
    }

    fn callback_mask(&self) -> NetworkCallbackFlags {
        NetworkCallbackFlags::UNRELIABLE_FEEDBACK
    }

    fn initialize_from_snapshot(
        &mut self,
        _frame: NetworkFrame,
        _src: &mut WireReader<'_>,
        owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        self.steering = self.local == Some(drone_owner(owner.network_id(), self.clients));
        Ok(())
    }

    fn prepare_unreliable_feedback(&mut self, _frame: NetworkFrame) -> bool {
        self.steering
    }

    fn write_unreliable_feedback(
        &mut self,
        _frame: NetworkFrame,
        dest: &mut WireWriter,
        owner: &OwnerContext<'_>,
    ) {
        let aim = owner.transform().position.normalize_or_zero();
        dest.write_vec3(aim);
    }

    fn read_unreliable_feedback(
        &mut self,
        feedback_frame: NetworkFrame,
        src: &mut WireReader<'_>,
        owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        let aim = src.read_vec3()?.normalize_or_zero();
        if self.latest_feedback_frame.is_some_and(|latest| feedback_frame < latest) {
            trace!("stale aim feedback @{} for object {}", feedback_frame, owner.network_id());
            return Ok(());
        }
        self.latest_feedback_frame = Some(feedback_frame);

        if aim != Vec3::ZERO {
            let mut transform = *owner.transform();
            transform.rotation = Quat::from_rotation_arc(Vec3::Z, aim);
            owner.set_transform(transform);
        }
        Ok(())
    }
}

/// Resolves the handful of prefabs the simulation spawns.
pub struct SimPrefabs {
    trace_capacity: usize,
    local: Option<(ConnectionId, u32)>,
}

impl SimPrefabs {
    pub fn server(trace_capacity: usize) -> Self {
        Self {
            trace_capacity,
            local: None,
        }
    }

    pub fn client(trace_capacity: usize, local: ConnectionId, clients: u32) -> Self {
        Self {
            trace_capacity,
            local: Some((local, clients)),
        }
    }

    fn aim_feedback(&self) -> AimFeedback {
        match self.local {
            Some((local, clients)) => AimFeedback::on_client(local, clients),
            None => AimFeedback::default(),
        }
    }
}

impl PrefabLoader for SimPrefabs {
    fn load_behaviors(
        &self,
        prefab: &PrefabRef,
    ) -> Result<Vec<Box<dyn NetworkBehavior>>, ReplicaError> {
        let transform: Box<dyn NetworkBehavior> =
            Box::new(ReplicatedNetworkTransform::new(self.trace_capacity));
        match prefab.name() {
            DRONE_PREFAB => Ok(vec![transform, Box::new(self.aim_feedback())]),
            CRATE_PREFAB => Ok(vec![transform]),
            other => Err(ReplicaError::UnresolvedPrefab(other.to_owned())),
        }
    }
}
