use std::path::Path;

use framelink_reassembly::StatsSnapshot;
use serde::Serialize;

use crate::udp::RxSnapshot;

/// End-of-run summary written with `--stats-json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub frames: StatsSnapshot,
    pub success_rate: f64,
    pub rx: RxSnapshot,
    pub queue_drops: u64,
    pub frames_not_written: u64,
}

impl RunReport {
    pub fn new(
        frames: StatsSnapshot,
        rx: RxSnapshot,
        queue_drops: u64,
        frames_not_written: u64,
    ) -> Self {
        Self {
            success_rate: frames.success_rate(),
            frames,
            rx,
            queue_drops,
            frames_not_written,
        }
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
