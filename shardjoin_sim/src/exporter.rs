//! JSON exporter for replaying a run frame by frame.
//!
//! Each exported frame carries the full machine snapshot plus the events
//! raised since the previous exported frame, enough for an external
//! renderer to draw the shards and the moving tokens.

use serde::Serialize;
use shardjoin_core::{JoinVariant, MachineEvent, Snapshot};
use std::fs::File;
use std::io::Write;

/// A single exported frame.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Frame number
    pub frame: u64,

    /// Simulation time in seconds
    pub time_sec: f64,

    /// Machine state at the end of the frame
    pub snapshot: Snapshot,

    /// Events since the previous exported frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<MachineEvent>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Join strategy
    pub variant: JoinVariant,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, variant: JoinVariant, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            variant,
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
