//! Pacing and layout configuration for the step state machine.
//!
//! Nothing here changes the phase order or gating; speeds, periods and
//! coordinates only decide how long each phase takes to play out.

use crate::model::JoinVariant;
use crate::motion::Point;
use serde::Serialize;
use std::time::Duration;

/// Anchor coordinates of the simulated machines on screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    /// x where probes leave the user tables
    pub user_exit_x: f32,

    /// x where probes enter the order tables
    pub order_entry_x: f32,

    /// x where probes enter the index tables
    pub index_entry_x: f32,

    /// x where probes leave the index tables towards the order tables
    pub index_exit_x: f32,

    /// y of the first table's top edge
    pub top: f32,

    /// Height of a table's title area
    pub header: f32,

    /// Vertical distance between rows
    pub row_pitch: f32,

    /// Offset from a row's top to its centre line
    pub row_centre: f32,

    /// Vertical distance between stacked shards of one relation
    pub shard_pitch: f32,
}

impl Layout {
    pub fn for_variant(variant: JoinVariant) -> Self {
        let order_entry_x = match variant {
            JoinVariant::FullScan => 560.0,
            JoinVariant::Partitioned => 760.0,
            JoinVariant::Indexed => 1050.0,
        };

        Self {
            user_exit_x: 450.0,
            order_entry_x,
            index_entry_x: 550.0,
            index_exit_x: 950.0,
            top: 50.0,
            header: 60.0,
            row_pitch: 30.0,
            row_centre: 12.0,
            shard_pitch: 300.0,
        }
    }

    /// Centre line y of `row` inside `shard`.
    pub fn row_y(&self, shard: usize, row: usize) -> f32 {
        self.top
            + shard as f32 * self.shard_pitch
            + self.header
            + row as f32 * self.row_pitch
            + self.row_centre
    }

    /// Where a probe leaves the user table for the subject at `row`.
    pub fn user_exit(&self, shard: usize, row: usize) -> Point {
        Point::new(self.user_exit_x, self.row_y(shard, row))
    }

    /// Where a probe sits while it reads `row` of an order shard.
    pub fn order_entry(&self, shard: usize, row: usize) -> Point {
        Point::new(self.order_entry_x, self.row_y(shard, row))
    }

    pub fn index_entry(&self, shard: usize, row: usize) -> Point {
        Point::new(self.index_entry_x, self.row_y(shard, row))
    }

    pub fn index_exit(&self, shard: usize, row: usize) -> Point {
        Point::new(self.index_exit_x, self.row_y(shard, row))
    }
}

/// Configuration for one step state machine.
#[derive(Debug, Clone, Serialize)]
pub struct MachineConfig {
    /// Token speed in layout units per frame
    pub packet_speed: f32,

    /// Minimum time between two inspected rows in a throttled scan
    pub scan_period: Duration,

    /// How long `Joining` stays visible before the next subject
    pub settle_delay: Duration,

    /// Machine coordinates
    pub layout: Layout,
}

impl MachineConfig {
    pub fn for_variant(variant: JoinVariant) -> Self {
        let packet_speed = match variant {
            JoinVariant::FullScan => 15.0,
            JoinVariant::Partitioned => 10.0,
            JoinVariant::Indexed => 15.0,
        };

        Self {
            packet_speed,
            scan_period: Duration::from_millis(200),
            settle_delay: Duration::from_millis(300),
            layout: Layout::for_variant(variant),
        }
    }

    /// Sets the token speed, in units per frame.
    ///
    /// # Panics
    /// If `speed` is not positive and finite; such a token never arrives.
    pub fn with_packet_speed(mut self, speed: f32) -> Self {
        assert!(
            speed > 0.0 && speed.is_finite(),
            "packet speed must be positive, got {}",
            speed
        );
        self.packet_speed = speed;
        self
    }

    /// Sets the scan throttle period.
    pub fn with_scan_period(mut self, period: Duration) -> Self {
        self.scan_period = period;
        self
    }

    /// Sets the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::for_variant(JoinVariant::default())
    }
}
