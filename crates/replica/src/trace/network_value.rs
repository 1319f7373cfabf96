use std::collections::VecDeque;

use glam::{Quat, Vec2, Vec3};

use crate::net::{NetworkFrame, NetworkTime};

pub const DEFAULT_TRACE_CAPACITY: usize = 64;

pub trait Interpolate: Copy {
    fn interpolate(&self, other: &Self, t: f32) -> Self;
}

impl Interpolate for f32 {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Interpolate for Vec2 {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        self.lerp(*other, t)
    }
}

impl Interpolate for Vec3 {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        self.lerp(*other, t)
    }
}

impl Interpolate for Quat {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        if self.dot(*other) < 0.0 {
            self.slerp(-*other, t)
        } else {
            self.slerp(*other, t)
        }
    }
}

/// Fixed-capacity trace of values keyed by frame, ordered oldest to newest.
#[derive(Debug, Clone)]
pub struct NetworkValue<T> {
    samples: VecDeque<(NetworkFrame, T)>,
    capacity: usize,
}

impl<T: Interpolate> Default for NetworkValue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl<T: Interpolate> NetworkValue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn first_frame(&self) -> Option<NetworkFrame> {
        self.samples.front().map(|(frame, _)| *frame)
    }

    pub fn last_frame(&self) -> Option<NetworkFrame> {
        self.samples.back().map(|(frame, _)| *frame)
    }

    /// Records `value` for `frame`. Returns false if the sample is older than everything
    /// retained by a full trace and was dropped.
    pub fn set(&mut self, frame: NetworkFrame, value: T) -> bool {
        match self.samples.binary_search_by_key(&frame, |(f, _)| *f) {
            Ok(index) => {
                self.samples[index].1 = value;
                true
            }
            Err(0) if self.samples.len() >= self.capacity => false,
            Err(index) => {
                if self.samples.len() >= self.capacity {
                    self.samples.pop_front();
                    self.samples.insert(index - 1, (frame, value));
                } else {
                    self.samples.insert(index, (frame, value));
                }
                true
            }
        }
    }

    pub fn get_raw(&self, frame: NetworkFrame) -> Option<T> {
        self.samples
            .binary_search_by_key(&frame, |(f, _)| *f)
            .ok()
            .map(|index| self.samples[index].1)
    }

    /// Samples the trace at `time`, bridging missing frames and clamping to the retained
    /// range on both ends.
    pub fn sample_valid(&self, time: NetworkTime) -> Option<T> {
        let &(first_frame, first) = self.samples.front()?;
        let &(last_frame, last) = self.samples.back()?;

        let t = time.as_f64();
        if t <= first_frame as f64 {
            return Some(first);
        }
        if t >= last_frame as f64 {
            return Some(last);
        }

        let upper = self.samples.partition_point(|(f, _)| *f as f64 <= t);
        let (from_frame, from) = self.samples[upper - 1];
        let (to_frame, to) = self.samples[upper];
        let factor = (t - from_frame as f64) / (to_frame - from_frame) as f64;

        Some(from.interpolate(&to, factor as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_trace_has_no_sample() {
        let trace = NetworkValue::<Vec3>::new(8);
        assert!(trace.sample_valid(NetworkTime::from_frame(3)).is_none());
        assert!(trace.get_raw(3).is_none());
    }

    #[test]
    fn set_overwrites_same_frame() {
        let mut trace = NetworkValue::new(8);
        trace.set(5, 1.0f32);
        trace.set(5, 2.0f32);

        assert_eq!(trace.len(), 1);
        assert_eq!(trace.get_raw(5), Some(2.0));
    }

    #[test]
    fn retains_only_newest_capacity_frames() {
        let mut trace = NetworkValue::new(4);
        for frame in 0..10u32 {
            trace.set(frame * 3, frame as f32);
        }

        assert_eq!(trace.len(), 4);
        assert_eq!(trace.first_frame(), Some(18));
        assert_eq!(trace.last_frame(), Some(27));
        assert!(trace.get_raw(15).is_none());
        assert_eq!(trace.get_raw(18), Some(6.0));
    }

    #[test]
    fn too_old_sample_is_dropped_when_full() {
        let mut trace = NetworkValue::new(2);
        trace.set(10, 1.0f32);
        trace.set(11, 2.0f32);

        assert!(!trace.set(9, 0.0));
        assert!(trace.get_raw(9).is_none());
        assert_eq!(trace.first_frame(), Some(10));
    }

    #[test]
    fn late_sample_inside_window_is_inserted_in_order() {
        let mut trace = NetworkValue::new(3);
        trace.set(10, 1.0f32);
        trace.set(12, 3.0f32);
        trace.set(13, 4.0f32);

        assert!(trace.set(11, 2.0));
        assert_eq!(trace.first_frame(), Some(11));
        assert_eq!(trace.get_raw(11), Some(2.0));
        assert!(trace.get_raw(10).is_none());
    }

    #[test]
    fn sample_interpolates_between_frames() {
        let mut trace = NetworkValue::new(8);
        trace.set(10, Vec3::ZERO);
        trace.set(11, Vec3::new(10.0, 0.0, -10.0));

        let value = trace.sample_valid(NetworkTime::new(10, 0.25)).unwrap();
        assert!((value - Vec3::new(2.5, 0.0, -2.5)).length() < 1e-4);
    }

    #[test]
    fn sample_bridges_missing_frames() {
        let mut trace = NetworkValue::new(8);
        trace.set(10, 0.0f32);
        trace.set(14, 8.0f32);

        let value = trace.sample_valid(NetworkTime::new(11, 0.0)).unwrap();
        assert!((value - 2.0).abs() < 1e-5);
    }

    #[test]
    fn sample_clamps_outside_window() {
        let mut trace = NetworkValue::new(8);
        trace.set(10, 1.0f32);
        trace.set(12, 5.0f32);

        assert_eq!(trace.sample_valid(NetworkTime::from_frame(2)), Some(1.0));
        assert_eq!(trace.sample_valid(NetworkTime::new(40, 0.5)), Some(5.0));
    }

    #[test]
    fn rotation_takes_shortest_arc() {
        let mut trace = NetworkValue::new(8);
        let from = Quat::from_rotation_y(0.1);
        let to = -Quat::from_rotation_y(0.3);
        trace.set(0, from);
        trace.set(1, to);

        let mid = trace.sample_valid(NetworkTime::new(0, 0.5)).unwrap();
        assert!(mid.angle_between(Quat::from_rotation_y(0.2)) < 1e-3);
    }

    #[test]
    fn resize_drops_oldest() {
        let mut trace = NetworkValue::new(8);
        for frame in 0..8u32 {
            trace.set(frame, frame as f32);
        }
        trace.resize(3);

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.first_frame(), Some(5));
    }
}
