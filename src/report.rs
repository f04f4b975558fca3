//! Summary of one finished run.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::pipeline::Direction;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub direction: Direction,
    /// Codec used for compression, or `auto` when decompressing.
    pub codec: String,
    pub blocks: usize,
    /// Block size the memory budget was computed for.
    pub block_size: u64,
    pub source_bytes: u64,
    pub destination_bytes: u64,
    pub workers: usize,
    pub resident_cap: usize,
    pub peak_resident_input: usize,
    pub peak_resident_output: usize,
    #[serde(serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Destination size relative to the source, as a percentage.
    pub fn ratio_percent(&self) -> f64 {
        if self.source_bytes == 0 {
            return 100.0;
        }
        self.destination_bytes as f64 * 100.0 / self.source_bytes as f64
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ed {} blocks: {} -> {} bytes ({:.1}%) in {:.2}s with {} workers",
            self.direction,
            self.blocks,
            self.source_bytes,
            self.destination_bytes,
            self.ratio_percent(),
            self.elapsed.as_secs_f64(),
            self.workers
        )
    }
}

fn as_secs_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport {
            direction: Direction::Compress,
            codec: "zstd".to_string(),
            blocks: 3,
            block_size: 50,
            source_bytes: 130,
            destination_bytes: 65,
            workers: 2,
            resident_cap: 4,
            peak_resident_input: 2,
            peak_resident_output: 1,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn serializes_elapsed_as_seconds() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["direction"], "compress");
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["peak_resident_input"], 2);
    }

    #[test]
    fn summary_line() {
        let line = report().to_string();
        assert!(line.starts_with("compressed 3 blocks: 130 -> 65 bytes (50.0%)"));
    }
}
