use std::fmt;

use serde::{Deserialize, Serialize};

use crate::carbon::EnergyReading;
use crate::engine::Generation;
use crate::monitor::{SampleTrace, GIB};
use crate::needle::NeedleReport;

/// Context targets, evaluated strictly in ascending order.
pub const DEFAULT_LADDER: [u32; 7] = [2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// The tiers one model will be driven through: the base ladder sorted and
/// deduplicated, capped by the model's declared context and by the operator's
/// ceiling when one is given.
pub fn ladder_for(base: &[u32], declared_context: u32, max_context: Option<u32>) -> Vec<u32> {
    let ceiling = max_context.map_or(declared_context, |m| m.min(declared_context));
    let mut tiers: Vec<u32> = base
        .iter()
        .copied()
        .filter(|t| *t > 0 && *t <= ceiling)
        .collect();
    tiers.sort_unstable();
    tiers.dedup();
    tiers
}

// ---------------------------------------------------------------------------
// TierOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierOutcome {
    Validated,
    Swap,
    Timeout,
    Failed,
}

impl fmt::Display for TierOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated => write!(f, "validated"),
            Self::Swap => write!(f, "swap"),
            Self::Timeout => write!(f, "timeout"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TierOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "validated" => Ok(Self::Validated),
            "swap" => Ok(Self::Swap),
            "timeout" => Ok(Self::Timeout),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid tier outcome: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// TierMetrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierMetrics {
    /// Inference-process footprint above its pre-call baseline.
    pub peak_ram_gb: f64,
    pub system_ram_peak_gb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_gb: Option<f64>,
    pub tokens_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<f64>,
    pub duration_s: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TierMetrics {
    pub fn from_call(generation: &Generation, trace: &SampleTrace) -> Self {
        Self {
            peak_ram_gb: round3(trace.footprint_bytes() as f64 / GIB),
            system_ram_peak_gb: round3(trace.peak_system_used() as f64 / GIB),
            accelerator_gb: trace
                .peak_accelerator_used()
                .map(|b| round3(b as f64 / GIB)),
            tokens_per_second: round2(generation.tokens_per_second()),
            ttft_ms: generation
                .time_to_first_token
                .map(|d| (d.as_secs_f64() * 1000.0).round()),
            duration_s: round2(generation.total_duration.as_secs_f64()),
            input_tokens: generation.input_tokens,
            output_tokens: generation.output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// TierResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub context: u32,
    pub outcome: TierOutcome,
    pub validated: bool,
    pub swap_detected: bool,
    pub output_capped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TierMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<EnergyReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needle: Option<NeedleReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TierResult {
    /// `validated` and `swap_detected` are derived from the outcome, so a
    /// swapping tier can never come out validated.
    pub fn new(context: u32, outcome: TierOutcome) -> Self {
        Self {
            context,
            outcome,
            validated: outcome == TierOutcome::Validated,
            swap_detected: outcome == TierOutcome::Swap,
            output_capped: false,
            metrics: None,
            energy: None,
            needle: None,
            error: None,
        }
    }

    pub fn timed_out(context: u32, reason: impl Into<String>) -> Self {
        let mut r = Self::new(context, TierOutcome::Timeout);
        r.error = Some(reason.into());
        r
    }

    pub fn failed(context: u32, reason: impl Into<String>) -> Self {
        let mut r = Self::new(context, TierOutcome::Failed);
        r.error = Some(reason.into());
        r
    }

    pub fn with_metrics(mut self, metrics: TierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_energy(mut self, energy: EnergyReading) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn with_output_capped(mut self, capped: bool) -> Self {
        self.output_capped = capped;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ladder_respects_declared_and_operator_ceiling() {
        assert_eq!(
            ladder_for(&DEFAULT_LADDER, 32768, None),
            vec![2048, 4096, 8192, 16384, 32768]
        );
        assert_eq!(
            ladder_for(&DEFAULT_LADDER, 131072, Some(8192)),
            vec![2048, 4096, 8192]
        );
        assert_eq!(ladder_for(&DEFAULT_LADDER, 4096, Some(65536)), vec![2048, 4096]);
        assert!(ladder_for(&DEFAULT_LADDER, 1024, None).is_empty());
    }

    #[test]
    fn test_ladder_is_sorted_and_deduplicated() {
        assert_eq!(
            ladder_for(&[8192, 2048, 8192, 0, 4096], 8192, None),
            vec![2048, 4096, 8192]
        );
    }

    #[test]
    fn test_swap_tier_is_never_validated() {
        let r = TierResult::new(32768, TierOutcome::Swap);
        assert!(r.swap_detected);
        assert!(!r.validated);
        let r = TierResult::new(2048, TierOutcome::Validated).with_output_capped(true);
        assert!(r.validated);
        assert!(r.output_capped);
    }

    #[test]
    fn test_metrics_from_call() {
        let generation = Generation {
            input_tokens: 30,
            output_tokens: 100,
            time_to_first_token: Some(Duration::from_millis(250)),
            total_duration: Duration::from_secs(5),
            ..Default::default()
        };
        let trace = SampleTrace {
            baseline: crate::monitor::ResourceSample {
                process_rss_bytes: 1 << 30,
                ..Default::default()
            },
            samples: vec![crate::monitor::ResourceSample {
                process_rss_bytes: 3 << 30,
                system_used_bytes: 8 << 30,
                ..Default::default()
            }],
        };
        let m = TierMetrics::from_call(&generation, &trace);
        assert_eq!(m.peak_ram_gb, 2.0);
        assert_eq!(m.system_ram_peak_gb, 8.0);
        assert_eq!(m.tokens_per_second, 20.0);
        assert_eq!(m.ttft_ms, Some(250.0));
        assert_eq!(m.total_tokens(), 130);
    }

    #[test]
    fn test_outcome_serde_is_lowercase() {
        let json = serde_json::to_string(&TierOutcome::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        assert_eq!("SWAP".parse::<TierOutcome>().unwrap(), TierOutcome::Swap);
    }
}
