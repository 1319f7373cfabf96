use serde::{Deserialize, Serialize};

use crate::trace::DEFAULT_TRACE_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Frames retained by every `NetworkValue` trace.
    pub trace_capacity: usize,
    /// How far behind the newest received frame the client renders.
    pub interpolation_delay_frames: f64,
    /// Upper bound on a single object payload; larger payloads are rejected as malformed.
    pub max_payload_size: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            interpolation_delay_frames: 2.0,
            max_payload_size: 16 * 1024,
        }
    }
}
