use glam::{Quat, Vec3};
use log::trace;

use super::behavior::{NetworkBehavior, NetworkCallbackFlags, OwnerContext};
use super::object_core::Transform;
use crate::error::ReplicaError;
use crate::net::{NetworkFrame, NetworkTime, WireReader, WireWriter};
use crate::trace::{DEFAULT_TRACE_CAPACITY, NetworkValue};

/// Number of consecutive unreliable deltas sent after the transform stops changing.
pub const NUM_UPLOAD_ATTEMPTS: u32 = 8;

/// Client-side correction hook applied after the transform is sampled from the traces.
pub trait InputReconciler: Send {
    fn reconcile(&mut self, sampled: Transform, input_time: NetworkTime) -> Transform;
}

/// Replicates the owner's world position and rotation over the unreliable channel.
pub struct ReplicatedNetworkTransform {
    track_only: bool,
    pending_upload_attempts: u32,
    latest_sample: Option<(Vec3, Quat)>,
    world_position_trace: NetworkValue<Vec3>,
    world_rotation_trace: NetworkValue<Quat>,
    reconciler: Option<Box<dyn InputReconciler>>,
}

impl Default for ReplicatedNetworkTransform {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl ReplicatedNetworkTransform {
    pub const CALLBACK_MASK: NetworkCallbackFlags = NetworkCallbackFlags::UPDATE_TRANSFORM_ON_SERVER
        .union(NetworkCallbackFlags::UNRELIABLE_DELTA)
        .union(NetworkCallbackFlags::INTERPOLATE_STATE);

    pub fn new(trace_capacity: usize) -> Self {
        Self {
            track_only: false,
            pending_upload_attempts: 0,
            latest_sample: None,
            world_position_trace: NetworkValue::new(trace_capacity),
            world_rotation_trace: NetworkValue::new(trace_capacity),
            reconciler: None,
        }
    }

    /// When set, the client keeps the traces up to date but never moves the owner.
    pub fn set_track_only(&mut self, track_only: bool) {
        self.track_only = track_only;
    }

    pub fn track_only(&self) -> bool {
        self.track_only
    }

    pub fn pending_upload_attempts(&self) -> u32 {
        self.pending_upload_attempts
    }

    pub fn set_input_reconciler(&mut self, reconciler: Box<dyn InputReconciler>) {
        self.reconciler = Some(reconciler);
    }

    pub fn temporal_world_position(&self, time: NetworkTime) -> Option<Vec3> {
        self.world_position_trace.sample_valid(time)
    }

    pub fn temporal_world_rotation(&self, time: NetworkTime) -> Option<Quat> {
        self.world_rotation_trace.sample_valid(time)
    }

    pub fn raw_temporal_world_position(&self, frame: NetworkFrame) -> Option<Vec3> {
        self.world_position_trace.get_raw(frame)
    }

    pub fn raw_temporal_world_rotation(&self, frame: NetworkFrame) -> Option<Quat> {
        self.world_rotation_trace.get_raw(frame)
    }

    fn record(&mut self, frame: NetworkFrame, position: Vec3, rotation: Quat) {
        self.world_position_trace.set(frame, position);
        self.world_rotation_trace.set(frame, rotation);
    }
}

impl NetworkBehavior for ReplicatedNetworkTransform {
    fn name(&self) -> &'static str {
        "ReplicatedNetworkTransform"
    }

    fn callback_mask(&self) -> NetworkCallbackFlags {
        Self::CALLBACK_MASK
    }

    fn initialize_from_snapshot(
        &mut self,
        frame: NetworkFrame,
        _src: &mut WireReader<'_>,
        owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        let transform = *owner.transform();
        self.record(frame, transform.position, transform.rotation);
        Ok(())
    }

    fn update_transform_on_server(&mut self, frame: NetworkFrame, owner: &OwnerContext<'_>) {
        let transform = owner.transform();
        let sample = (transform.position, transform.rotation);
        self.record(frame, sample.0, sample.1);

        if self.latest_sample != Some(sample) {
            self.latest_sample = Some(sample);
            self.pending_upload_attempts = NUM_UPLOAD_ATTEMPTS;
        }
    }

    fn interpolate_state(
        &mut self,
        replica_time: NetworkTime,
        input_time: NetworkTime,
        owner: &mut OwnerContext<'_>,
    ) {
        if self.track_only {
            return;
        }

        let (Some(position), Some(rotation)) = (
            self.world_position_trace.sample_valid(replica_time),
            self.world_rotation_trace.sample_valid(replica_time),
        ) else {
            return;
        };

        let mut transform = *owner.transform();
        transform.position = position;
        transform.rotation = rotation;
        if let Some(reconciler) = self.reconciler.as_mut() {
            transform = reconciler.reconcile(transform, input_time);
        }
        owner.set_transform(transform);
    }

    fn prepare_unreliable_delta(&mut self, _frame: NetworkFrame) -> bool {
        if self.pending_upload_attempts == 0 {
            return false;
        }
        self.pending_upload_attempts -= 1;
        true
    }

    fn write_unreliable_delta(
        &mut self,
        frame: NetworkFrame,
        dest: &mut WireWriter,
        owner: &OwnerContext<'_>,
    ) {
        let transform = owner.transform();
        let position = self.raw_temporal_world_position(frame).unwrap_or(transform.position);
        let rotation = self.raw_temporal_world_rotation(frame).unwrap_or(transform.rotation);

        dest.write_vec3(position);
        dest.write_quat(rotation);
    }

    fn read_unreliable_delta(
        &mut self,
        frame: NetworkFrame,
        src: &mut WireReader<'_>,
        owner: &mut OwnerContext<'_>,
    ) -> Result<(), ReplicaError> {
        let position = src.read_vec3()?;
        let rotation = src.read_quat()?;
        trace!("object {} transform @{}: {}", owner.network_id(), frame, position);

        self.record(frame, position, rotation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetworkId;
    use crate::object::ObjectCore;

    fn moved_core(position: Vec3) -> ObjectCore {
        let mut core = ObjectCore::new(NetworkId(1));
        core.set_world_position(position);
        core
    }

    #[test]
    fn one_change_is_uploaded_exactly_eight_times() {
        let mut transform = ReplicatedNetworkTransform::default();
        let mut core = moved_core(Vec3::X);

        transform.update_transform_on_server(1, &OwnerContext::new(&mut core));
        let mut uploads = 0;
        for frame in 1..20 {
            if frame > 1 {
                transform.update_transform_on_server(frame, &OwnerContext::new(&mut core));
            }
            if transform.prepare_unreliable_delta(frame) {
                uploads += 1;
            }
        }

        assert_eq!(uploads, NUM_UPLOAD_ATTEMPTS);
        assert_eq!(transform.pending_upload_attempts(), 0);
    }

    #[test]
    fn new_change_restarts_attempts() {
        let mut transform = ReplicatedNetworkTransform::default();
        let mut core = moved_core(Vec3::X);
        transform.update_transform_on_server(1, &OwnerContext::new(&mut core));
        for frame in 1..5 {
            transform.prepare_unreliable_delta(frame);
        }
        assert_eq!(transform.pending_upload_attempts(), 4);

        core.set_world_position(Vec3::Y);
        transform.update_transform_on_server(5, &OwnerContext::new(&mut core));
        assert_eq!(transform.pending_upload_attempts(), NUM_UPLOAD_ATTEMPTS);
    }

    #[test]
    fn delta_round_trip_feeds_interpolation() {
        let mut server = ReplicatedNetworkTransform::default();
        let mut client = ReplicatedNetworkTransform::default();
        let mut server_core = moved_core(Vec3::ZERO);
        let mut client_core = moved_core(Vec3::ZERO);

        for (frame, x) in [(10, 0.0), (11, 4.0)] {
            server_core.set_world_position(Vec3::new(x, 0.0, 0.0));
            server.update_transform_on_server(frame, &OwnerContext::new(&mut server_core));
            assert!(server.prepare_unreliable_delta(frame));

            let mut writer = WireWriter::new();
            server.write_unreliable_delta(frame, &mut writer, &OwnerContext::new(&mut server_core));
            client
                .read_unreliable_delta(
                    frame,
                    &mut WireReader::new(writer.as_slice()),
                    &mut OwnerContext::new(&mut client_core),
                )
                .unwrap();
        }

        let time = NetworkTime::new(10, 0.5);
        client.interpolate_state(time, time, &mut OwnerContext::new(&mut client_core));
        assert!((client_core.transform().position.x - 2.0).abs() < 1e-5);
        assert_eq!(client.raw_temporal_world_position(11), Some(Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn track_only_leaves_owner_untouched() {
        let mut transform = ReplicatedNetworkTransform::default();
        transform.set_track_only(true);
        let mut core = moved_core(Vec3::ZERO);

        let mut writer = WireWriter::new();
        writer.write_vec3(Vec3::splat(5.0));
        writer.write_quat(Quat::IDENTITY);
        transform
            .read_unreliable_delta(
                3,
                &mut WireReader::new(writer.as_slice()),
                &mut OwnerContext::new(&mut core),
            )
            .unwrap();
        transform.interpolate_state(
            NetworkTime::from_frame(3),
            NetworkTime::from_frame(3),
            &mut OwnerContext::new(&mut core),
        );

        assert_eq!(core.transform().position, Vec3::ZERO);
        assert_eq!(
            transform.temporal_world_position(NetworkTime::from_frame(3)),
            Some(Vec3::splat(5.0))
        );
    }

    struct Lift(f32);

    impl InputReconciler for Lift {
        fn reconcile(&mut self, mut sampled: Transform, input_time: NetworkTime) -> Transform {
            sampled.position.y += self.0 * input_time.frame() as f32;
            sampled
        }
    }

    #[test]
    fn reconciler_sees_input_time() {
        let mut transform = ReplicatedNetworkTransform::default();
        transform.set_input_reconciler(Box::new(Lift(0.5)));
        let mut core = moved_core(Vec3::ZERO);
        transform
            .initialize_from_snapshot(
                1,
                &mut WireReader::new(&[]),
                &mut OwnerContext::new(&mut core),
            )
            .unwrap();

        transform.interpolate_state(
            NetworkTime::from_frame(1),
            NetworkTime::from_frame(4),
            &mut OwnerContext::new(&mut core),
        );
        assert_eq!(core.transform().position, Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn interpolation_without_samples_is_noop() {
        let mut transform = ReplicatedNetworkTransform::default();
        let mut core = moved_core(Vec3::Z);
        transform.interpolate_state(
            NetworkTime::from_frame(9),
            NetworkTime::from_frame(9),
            &mut OwnerContext::new(&mut core),
        );
        assert_eq!(core.transform().position, Vec3::Z);
    }
}
