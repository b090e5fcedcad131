//! Cross-tier swap detection.
//!
//! Once physical RAM saturates the OS pages inactive parts of the model out,
//! so the measured footprint shrinks while the requested context grows. A tier
//! whose footprint falls below a fixed fraction of the previous tier's
//! footprint is therefore treated as swapping, whatever the raw memory numbers
//! suggest.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SWAP_RATIO: f64 = 0.80;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwapVerdict {
    pub swap_detected: bool,
    /// Footprint of the tier under test.
    pub footprint_bytes: u64,
    /// Footprint of the immediately preceding lower tier, if any.
    pub previous_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapDetector {
    ratio: f64,
}

impl Default for SwapDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SWAP_RATIO)
    }
}

impl SwapDetector {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: ratio.clamp(0.0, 1.0),
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Compare a tier's footprint against the preceding tier's. The first tier
    /// of a run has nothing to compare against and is never flagged.
    pub fn judge(&self, previous_bytes: Option<u64>, footprint_bytes: u64) -> SwapVerdict {
        let swap_detected = match previous_bytes {
            Some(prev) if prev > 0 => (footprint_bytes as f64) < (prev as f64) * self.ratio,
            _ => false,
        };
        SwapVerdict {
            swap_detected,
            footprint_bytes,
            previous_bytes,
        }
    }
}
