use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec3;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replica::{
    BehaviorNetworkObject, ClientConnection, ClientReplica, ConnectionId, NetworkFrame, NetworkId,
    NetworkObject, NetworkTime, PrefabLoader, PrefabRef, ServerOutput, ServerReplicator,
    StaticNetworkObject,
};

use crate::config::SimConfig;
use crate::prefabs::{CRATE_PREFAB, DRONE_PREFAB, SimPrefabs};

const GROUND_ID: NetworkId = NetworkId(1000);
const GROUND_PREFAB: &str = "Objects/Ground.xml";
const REPARENT_INTERVAL: NetworkFrame = 120;
const ORBIT_RADIUS: f64 = 6.0;

#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub ticks: u32,
    pub reliable_bytes: u64,
    pub unreliable_bytes: u64,
    pub feedback_bytes: u64,
    pub dropped_packets: u64,
    pub resyncs: u64,
    pub error_samples: u64,
    pub total_error: f64,
    pub max_error: f32,
}

impl SimStats {
    pub fn mean_error(&self) -> f64 {
        if self.error_samples == 0 {
            return 0.0;
        }
        self.total_error / self.error_samples as f64
    }
}

/// One authoritative server and several clients wired together through in-memory channels.
pub struct Simulation {
    config: SimConfig,
    server: ServerReplicator,
    clients: Vec<ClientReplica>,
    rng: StdRng,
    stats: SimStats,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self> {
        let loader = SimPrefabs::server(config.replica.trace_capacity);
        let mut server = ServerReplicator::new(config.replica.clone());

        server.add_object(Box::new(StaticNetworkObject::with_prefab(
            GROUND_ID,
            PrefabRef::new(GROUND_PREFAB),
        )))?;

        for index in 0..config.objects {
            let prefab = PrefabRef::new(if index % 2 == 0 { DRONE_PREFAB } else { CRATE_PREFAB });
            let mut object = BehaviorNetworkObject::with_prefab(object_id(index), prefab.clone());
            for behavior in loader.load_behaviors(&prefab)? {
                object.add_behavior(behavior)?;
            }
            object.core_mut().set_world_position(orbit(index, 0.0, config.tick_rate));
            server.add_object(Box::new(object))?;
        }

        let mut clients = Vec::with_capacity(config.clients as usize);
        for index in 0..config.clients {
            let connection = ClientConnection::new(index, format!("sim-client-{index}"));
            server.add_connection(Box::new(connection))?;
            let loader = SimPrefabs::client(
                config.replica.trace_capacity,
                ConnectionId(index),
                config.clients,
            );
            clients.push(ClientReplica::new(config.replica.clone(), Arc::new(loader)));
        }

        info!(
            "simulating {} objects for {} clients at {} Hz, {:.1}% loss",
            config.objects, config.clients, config.tick_rate, config.loss.loss_percent
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.loss.seed),
            config,
            server,
            clients,
            stats: SimStats::default(),
        })
    }

    pub fn run(mut self) -> Result<SimStats> {
        let tick_duration = Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64);

        for frame in 1..=self.config.ticks {
            let tick_start = Instant::now();
            self.tick(frame)?;

            if frame % self.config.tick_rate.max(1) == 0 {
                debug!(
                    "frame {}: mean error {:.4}, {} resyncs, {} dropped",
                    frame,
                    self.stats.mean_error(),
                    self.stats.resyncs,
                    self.stats.dropped_packets
                );
            }

            if self.config.realtime {
                if let Some(remaining) = tick_duration.checked_sub(tick_start.elapsed()) {
                    thread::sleep(remaining);
                }
            }
        }
        Ok(self.stats)
    }

    fn tick(&mut self, frame: NetworkFrame) -> Result<()> {
        self.move_objects(frame);

        let outputs = self.server.step(frame);
        for output in &outputs {
            self.deliver(output)?;
        }

        let input_time = NetworkTime::from_frame(frame);
        for (index, client) in self.clients.iter_mut().enumerate() {
            let connection = ConnectionId(index as u32);
            for network_id in client.take_resync_requests() {
                self.server.request_resync(connection, network_id)?;
                self.stats.resyncs += 1;
            }

            client.interpolate(input_time);
            measure_error(client, input_time, self.config.tick_rate, &mut self.stats);

            if let Some(feedback) = client.write_feedback(frame) {
                self.stats.feedback_bytes += feedback.len() as u64;
                if should_drop(&mut self.rng, self.config.loss.loss_percent) {
                    self.stats.dropped_packets += 1;
                    continue;
                }
                self.server
                    .process_feedback(connection, &feedback)
                    .with_context(|| format!("feedback from {connection} @{frame}"))?;
            }
        }

        self.stats.ticks = frame;
        Ok(())
    }

    fn move_objects(&mut self, frame: NetworkFrame) {
        for index in 0..self.config.objects {
            let position = orbit(index, frame as f64, self.config.tick_rate);
            if let Some(object) = self.server.object_mut(object_id(index)) {
                object.core_mut().set_world_position(position);
            }
        }

        if frame % REPARENT_INTERVAL == 0 {
            for index in (1..self.config.objects).step_by(2) {
                if let Some(object) = self.server.object_mut(object_id(index)) {
                    let parent = match object.parent_network_id() {
                        Some(_) => None,
                        None => Some(GROUND_ID),
                    };
                    object.core_mut().set_parent(parent);
                }
            }
        }
    }

    /// Reliable messages always arrive; unreliable ones are subject to simulated loss.
    fn deliver(&mut self, output: &ServerOutput) -> Result<()> {
        let Some(client) = self.clients.get_mut(output.connection.0 as usize) else {
            warn!("output for unknown {}", output.connection);
            return Ok(());
        };

        if let Some(reliable) = &output.reliable {
            self.stats.reliable_bytes += reliable.len() as u64;
            client
                .process_reliable(reliable)
                .with_context(|| format!("reliable message for {}", output.connection))?;
        }
        if let Some(unreliable) = &output.unreliable {
            self.stats.unreliable_bytes += unreliable.len() as u64;
            if should_drop(&mut self.rng, self.config.loss.loss_percent) {
                self.stats.dropped_packets += 1;
            } else {
                client
                    .process_unreliable(unreliable)
                    .with_context(|| format!("unreliable message for {}", output.connection))?;
            }
        }
        Ok(())
    }
}

fn object_id(index: u32) -> NetworkId {
    NetworkId(index + 1)
}

fn orbit(index: u32, frame: f64, tick_rate: u32) -> Vec3 {
    let seconds = frame / tick_rate.max(1) as f64;
    let angle = seconds * (0.5 + 0.1 * index as f64) + index as f64 * TAU / 8.0;
    Vec3::new(
        (angle.cos() * ORBIT_RADIUS) as f32,
        0.5 * index as f32,
        (angle.sin() * ORBIT_RADIUS) as f32,
    )
}

fn should_drop(rng: &mut StdRng, loss_percent: f32) -> bool {
    loss_percent > 0.0 && rng.gen_range(0.0f32..100.0) < loss_percent
}

/// Compares every replicated mover against where the server had it at replica time.
fn measure_error(
    client: &ClientReplica,
    input_time: NetworkTime,
    tick_rate: u32,
    stats: &mut SimStats,
) {
    let replica_time = client.replica_time(input_time);
    if replica_time.frame() == 0 {
        return;
    }

    for network_id in client.object_ids().filter(|id| *id != GROUND_ID) {
        let Some(object) = client.object(network_id) else {
            continue;
        };
        let expected = orbit(network_id.0 - 1, replica_time.as_f64(), tick_rate);
        let error = object.core().transform().position.distance(expected);

        stats.error_samples += 1;
        stats.total_error += error as f64;
        stats.max_error = stats.max_error.max(error);
    }
}
