mod network_value;

pub use network_value::{DEFAULT_TRACE_CAPACITY, Interpolate, NetworkValue};
