//! # Interpolation
//!
//! Previous/current snapshot pair for rendering between authoritative
//! updates.
//!
//! The server emits state on a fixed interval; frames render far more
//! often. Each entity keeps the last two snapshots and a progress value
//! that advances with frame time, so presentation blends from the older
//! snapshot toward the newer one instead of teleporting on every packet.
//!
//! Progress saturates at 1: when an update arrives late the entity holds
//! at the newest snapshot rather than extrapolating past it.

use std::f32::consts::{PI, TAU};
use std::time::Duration;

use crate::protocol::{EntityTransform, Vec2};

/// Linear interpolation between two scalars, `t` in `[0, 1]`.
#[inline]
#[must_use]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Angle interpolation along the shortest arc, in radians.
#[inline]
#[must_use]
pub fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    let diff = (b - a).rem_euclid(TAU);
    let shortest = if diff > PI { diff - TAU } else { diff };
    a + shortest * t
}

/// Blends two transforms, taking the shortest arc for the facing angle.
#[must_use]
pub fn blend_transforms(prev: &EntityTransform, cur: &EntityTransform, t: f32) -> EntityTransform {
    EntityTransform {
        position: Vec2::new(
            lerp(prev.position.x, cur.position.x, t),
            lerp(prev.position.y, cur.position.y, t),
        ),
        rotation: lerp_angle(prev.rotation, cur.rotation, t),
    }
}

/// The last two snapshots of one interpolated value.
#[derive(Clone, Debug)]
pub struct PrevCurQueue<T> {
    previous: Option<T>,
    current: Option<T>,
    progress: f32,
    interval: Duration,
}

impl<T> PrevCurQueue<T> {
    /// Creates an empty queue expecting updates every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            previous: None,
            current: None,
            progress: 0.0,
            interval,
        }
    }

    /// Accepts a fresh snapshot, shifting the old current back and
    /// restarting the blend.
    pub fn push(&mut self, value: T) {
        self.previous = self.current.take();
        self.current = Some(value);
        self.progress = 0.0;
    }

    /// Advances the blend by one frame's worth of time.
    ///
    /// A zero update interval degenerates to no blending: progress jumps
    /// straight to 1 so sampling always yields the newest snapshot.
    pub fn advance(&mut self, dt: Duration) {
        if self.interval.is_zero() {
            self.progress = 1.0;
            return;
        }
        let step = dt.as_secs_f32() / self.interval.as_secs_f32();
        self.progress = (self.progress + step).min(1.0);
    }

    /// True once two snapshots are buffered and blending is meaningful.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.previous.is_some() && self.current.is_some()
    }

    /// The older snapshot.
    #[must_use]
    pub const fn previous(&self) -> Option<&T> {
        self.previous.as_ref()
    }

    /// The newer snapshot.
    #[must_use]
    pub const fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Blend position in `[0, 1]`.
    #[must_use]
    pub const fn progress(&self) -> f32 {
        self.progress
    }

    /// Blends the buffered pair with `blend`, or `None` until ready.
    pub fn sample<R>(&self, blend: impl FnOnce(&T, &T, f32) -> R) -> Option<R> {
        match (&self.previous, &self.current) {
            (Some(prev), Some(cur)) => Some(blend(prev, cur, self.progress)),
            _ => None,
        }
    }

    /// Drops both snapshots, e.g. when the entity respawns.
    pub fn clear(&mut self) {
        self.previous = None;
        self.current = None;
        self.progress = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[test]
    fn not_ready_until_two_snapshots() {
        let mut queue = PrevCurQueue::new(INTERVAL);
        assert!(!queue.is_ready());

        queue.push(0.0f32);
        assert!(!queue.is_ready());
        assert!(queue.sample(|a, b, t| lerp(*a, *b, t)).is_none());

        queue.push(10.0f32);
        assert!(queue.is_ready());
    }

    #[test]
    fn progress_tracks_frame_time_and_saturates() {
        let mut queue = PrevCurQueue::new(INTERVAL);
        queue.push(0.0f32);
        queue.push(10.0f32);

        queue.advance(Duration::from_millis(25));
        assert!((queue.progress() - 0.5).abs() < 1e-6);
        let mid = queue.sample(|a, b, t| lerp(*a, *b, t)).unwrap();
        assert!((mid - 5.0).abs() < 1e-4);

        // A stalled stream holds at the newest snapshot.
        queue.advance(Duration::from_millis(500));
        assert!((queue.progress() - 1.0).abs() < f32::EPSILON);
        let end = queue.sample(|a, b, t| lerp(*a, *b, t)).unwrap();
        assert!((end - 10.0).abs() < 1e-4);
    }

    #[test]
    fn zero_interval_snaps_to_the_newest_snapshot() {
        let mut queue = PrevCurQueue::new(Duration::ZERO);
        queue.push(0.0f32);
        queue.push(10.0f32);

        queue.advance(Duration::ZERO);
        assert!((queue.progress() - 1.0).abs() < f32::EPSILON);
        let sampled = queue.sample(|a, b, t| lerp(*a, *b, t)).unwrap();
        assert!((sampled - 10.0).abs() < 1e-4);
    }

    #[test]
    fn new_snapshot_restarts_the_blend() {
        let mut queue = PrevCurQueue::new(INTERVAL);
        queue.push(0.0f32);
        queue.push(10.0f32);
        queue.advance(Duration::from_millis(50));

        queue.push(20.0f32);
        assert!((queue.progress()).abs() < f32::EPSILON);
        assert_eq!(queue.previous(), Some(&10.0));
        assert_eq!(queue.current(), Some(&20.0));
    }

    #[test]
    fn angles_blend_along_the_shortest_arc() {
        // 170° to -170° should pass through 180°, not swing through 0°.
        let a = 170.0f32.to_radians();
        let b = -170.0f32.to_radians();
        let mid = lerp_angle(a, b, 0.5);
        assert!((mid - 180.0f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    fn transform_blend_covers_position_and_facing() {
        let prev = EntityTransform {
            position: Vec2::new(0.0, 0.0),
            rotation: 0.0,
        };
        let cur = EntityTransform {
            position: Vec2::new(4.0, 2.0),
            rotation: PI / 2.0,
        };

        let mid = blend_transforms(&prev, &cur, 0.5);
        assert!((mid.position.x - 2.0).abs() < 1e-5);
        assert!((mid.position.y - 1.0).abs() < 1e-5);
        assert!((mid.rotation - PI / 4.0).abs() < 1e-5);
    }
}
