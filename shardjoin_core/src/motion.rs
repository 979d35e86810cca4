//! The Motion Model - constant-speed straight-line token trajectories.
//!
//! A trajectory moves a probe token from `start` towards `target` by a
//! fixed velocity vector each frame. Arrival is decided by comparing the
//! squared distance travelled with the squared total distance, so a token
//! may overshoot the target by at most one frame's travel. That overshoot
//! is never clamped.

use nalgebra::Vector2;
use serde::Serialize;

/// Screen-space point (x right, y down).
pub type Point = Vector2<f32>;

/// An in-flight token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    start: Point,
    target: Point,
    position: Point,
    velocity: Point,
}

impl Trajectory {
    /// Begins a trajectory from `from` to `to` at `speed` units per frame.
    ///
    /// When `from == to` the velocity is zero and the token has already
    /// arrived.
    ///
    /// # Panics
    /// A token that has somewhere to go needs a positive, finite speed.
    pub fn begin(from: Point, to: Point, speed: f32) -> Self {
        let delta = to - from;
        let distance = delta.norm();
        assert!(
            distance == 0.0 || (speed > 0.0 && speed.is_finite()),
            "token speed must be positive, got {}",
            speed
        );
        let velocity = if distance > 0.0 {
            delta * (speed / distance)
        } else {
            Point::zeros()
        };

        Self {
            start: from,
            target: to,
            position: from,
            velocity,
        }
    }

    /// A token resting at `point`: zero velocity, already arrived.
    pub fn at_rest(point: Point) -> Self {
        Self::begin(point, point, 0.0)
    }

    /// Moves the token by one frame and reports whether it has arrived.
    ///
    /// Once arrived, further calls leave the position unchanged.
    pub fn advance(&mut self) -> (Point, bool) {
        if !self.arrived() {
            self.position += self.velocity;
        }
        (self.position, self.arrived())
    }

    /// True when the distance travelled reaches the total distance.
    pub fn arrived(&self) -> bool {
        let total = (self.target - self.start).norm_squared();
        let travelled = (self.position - self.start).norm_squared();
        travelled >= total
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn target(&self) -> Point {
        self.target
    }

    pub fn velocity(&self) -> Point {
        self.velocity
    }

    /// Upper bound on the frames `advance` needs to report arrival.
    pub fn frames_to_arrive(&self) -> u64 {
        let speed = self.velocity.norm();
        if speed == 0.0 {
            return 0;
        }
        ((self.target - self.start).norm() / speed).ceil() as u64
    }
}
