mod config;
mod prefabs;
mod simulation;

use anyhow::{Result, ensure};
use clap::Parser;
use replica::ReplicaConfig;

use config::{LossSimulation, SimConfig};
use simulation::Simulation;

#[derive(Parser)]
#[command(name = "replica-sim")]
#[command(about = "Headless server/client replication loopback")]
struct Args {
    #[arg(short, long, default_value_t = 600)]
    ticks: u32,

    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 2)]
    clients: u32,

    #[arg(short, long, default_value_t = 8)]
    objects: u32,

    #[arg(long, help = "Sleep between ticks to run at the tick rate")]
    realtime: bool,

    #[arg(long, default_value_t = 0.0, help = "Unreliable packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Seed for the loss simulation")]
    seed: u64,

    #[arg(long, default_value_t = replica::DEFAULT_TRACE_CAPACITY)]
    trace_capacity: usize,

    #[arg(long, default_value_t = 2.0, help = "Interpolation delay in frames")]
    delay: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    ensure!(
        (0.0..=100.0).contains(&args.loss_percent),
        "loss percent must be within 0-100, got {}",
        args.loss_percent
    );

    let config = SimConfig {
        ticks: args.ticks,
        tick_rate: args.tick_rate,
        clients: args.clients,
        objects: args.objects,
        realtime: args.realtime,
        loss: LossSimulation {
            loss_percent: args.loss_percent,
            seed: args.seed,
        },
        replica: ReplicaConfig {
            trace_capacity: args.trace_capacity,
            interpolation_delay_frames: args.delay,
            ..Default::default()
        },
    };

    let stats = Simulation::new(config)?.run()?;

    log::info!(
        "{} ticks: reliable {} B, unreliable {} B, feedback {} B",
        stats.ticks,
        stats.reliable_bytes,
        stats.unreliable_bytes,
        stats.feedback_bytes
    );
    log::info!(
        "dropped {} packets, {} resyncs, mean error {:.4}, max error {:.4}",
        stats.dropped_packets,
        stats.resyncs,
        stats.mean_error(),
        stats.max_error
    );
    Ok(())
}
