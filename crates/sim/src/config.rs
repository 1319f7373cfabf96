use replica::ReplicaConfig;

#[derive(Debug, Clone)]
pub struct LossSimulation {
    pub loss_percent: f32,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub ticks: u32,
    pub tick_rate: u32,
    pub clients: u32,
    pub objects: u32,
    pub realtime: bool,
    pub loss: LossSimulation,
    pub replica: ReplicaConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ticks: 600,
            tick_rate: 60,
            clients: 2,
            objects: 8,
            realtime: false,
            loss: LossSimulation {
                loss_percent: 0.0,
                seed: 0,
            },
            replica: ReplicaConfig::default(),
        }
    }
}
