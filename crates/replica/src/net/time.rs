use std::fmt;

use serde::{Deserialize, Serialize};

pub type NetworkFrame = u32;

/// Point in time measured in simulation frames, with a fractional part in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkTime {
    frame: NetworkFrame,
    sub_frame: f32,
}

impl NetworkTime {
    pub fn new(frame: NetworkFrame, sub_frame: f32) -> Self {
        Self::from_f64(frame as f64 + sub_frame as f64)
    }

    pub fn from_frame(frame: NetworkFrame) -> Self {
        Self {
            frame,
            sub_frame: 0.0,
        }
    }

    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self::default();
        }
        if value >= NetworkFrame::MAX as f64 {
            return Self::from_frame(NetworkFrame::MAX);
        }

        let whole = value.floor();
        let mut frame = whole as NetworkFrame;
        let mut sub_frame = (value - whole) as f32;
        if sub_frame >= 1.0 {
            frame = frame.saturating_add(1);
            sub_frame = 0.0;
        }
        Self { frame, sub_frame }
    }

    pub fn frame(&self) -> NetworkFrame {
        self.frame
    }

    pub fn sub_frame(&self) -> f32 {
        self.sub_frame
    }

    pub fn as_f64(&self) -> f64 {
        self.frame as f64 + self.sub_frame as f64
    }

    pub fn offset(self, frames: f64) -> Self {
        Self::from_f64(self.as_f64() + frames)
    }
}

impl From<NetworkFrame> for NetworkTime {
    fn from(frame: NetworkFrame) -> Self {
        Self::from_frame(frame)
    }
}

impl fmt::Display for NetworkTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:.3}", self.frame, self.sub_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_sub_frame() {
        let time = NetworkTime::new(10, 1.25);
        assert_eq!(time.frame(), 11);
        assert!((time.sub_frame() - 0.25).abs() < 1e-6);

        let time = NetworkTime::new(10, -0.5);
        assert_eq!(time.frame(), 9);
        assert!((time.sub_frame() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn offset_saturates_at_zero() {
        let time = NetworkTime::from_frame(2).offset(-5.0);
        assert_eq!(time, NetworkTime::default());
    }
}
