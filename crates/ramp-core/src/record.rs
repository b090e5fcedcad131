use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelKind;
use crate::needle::NeedleReport;
use crate::tier::TierResult;

/// Bumped whenever a change to the record shape or to the measurement method
/// makes older records incomparable. Older records are re-run on resume.
pub const SCHEMA_VERSION: u32 = 3;

// ---------------------------------------------------------------------------
// HaltReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    LadderComplete,
    InsufficientHeadroom,
    SwapDetected,
    Timeout,
    EngineFailure,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LadderComplete => write!(f, "ladder_complete"),
            Self::InsufficientHeadroom => write!(f, "insufficient_headroom"),
            Self::SwapDetected => write!(f, "swap_detected"),
            Self::Timeout => write!(f, "timeout"),
            Self::EngineFailure => write!(f, "engine_failure"),
        }
    }
}

// ---------------------------------------------------------------------------
// Grades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UxRating {
    Instant,
    Fast,
    Acceptable,
    Slow,
    #[default]
    #[serde(rename = "n/a")]
    NotAvailable,
}

impl fmt::Display for UxRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instant => write!(f, "instant"),
            Self::Fast => write!(f, "fast"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::Slow => write!(f, "slow"),
            Self::NotAvailable => write!(f, "n/a"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EfficiencyGrade {
    Excellent,
    Good,
    Poor,
    #[default]
    #[serde(rename = "n/a")]
    NotAvailable,
}

impl fmt::Display for EfficiencyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Poor => write!(f, "poor"),
            Self::NotAvailable => write!(f, "n/a"),
        }
    }
}

// ---------------------------------------------------------------------------
// Functional scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageResult {
    pub comprehension: bool,
    pub generation: bool,
}

impl LanguageResult {
    pub fn supported(&self) -> bool {
        self.comprehension || self.generation
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionalScores {
    pub reasoning_avg: f64,
    pub instruction_following_avg: f64,
    /// False when the tool probes were skipped for a model that does not
    /// declare tool support.
    pub tools_tested: bool,
    pub tool_success_rate: f64,
    /// Share of irrelevant-question probes where the model correctly did not
    /// call the tool.
    pub tool_restraint_rate: f64,
    pub json_valid_rate: f64,
    pub json_schema_compliance_rate: f64,
    pub response_variance: f64,
    pub languages: BTreeMap<String, LanguageResult>,
}

impl FunctionalScores {
    pub fn languages_validated(&self) -> Vec<String> {
        self.languages
            .iter()
            .filter(|(_, r)| r.supported())
            .map(|(code, _)| code.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BenchmarkRecord
// ---------------------------------------------------------------------------

/// Durable result of one model's run. One per model, overwritten on re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub model: String,
    pub tag: String,
    pub kind: ModelKind,
    pub schema_version: u32,
    pub run_date: DateTime<Utc>,
    /// False when the run skipped the functional battery or an operator
    /// ceiling cut the ladder short. Partial records are re-run on resume.
    pub complete: bool,
    /// On-disk size reported by the engine; absent for remote models.
    #[serde(default)]
    pub size_gb: Option<f64>,

    pub max_validated_context: Option<u32>,
    pub ram_at_max_context_gb: Option<f64>,
    pub avg_tokens_per_second: f64,
    pub avg_ttft_ms: Option<f64>,

    pub total_co2_kg: f64,
    pub co2_per_1k_tokens_kg: f64,
    pub energy_degraded: bool,

    pub functional: Option<FunctionalScores>,
    /// Keyed `ctx_8k` etc.
    pub needle_in_haystack: BTreeMap<String, NeedleReport>,

    pub ux_rating: UxRating,
    pub efficiency_ratio: Option<f64>,
    pub efficiency_grade: EfficiencyGrade,
    pub detected_license: String,
    pub capabilities_validated: Vec<String>,

    pub halt_reason: HaltReason,
    pub failure_reason: Option<String>,
    pub tiers: Vec<TierResult>,
}

impl BenchmarkRecord {
    pub fn tier(&self, context: u32) -> Option<&TierResult> {
        self.tiers.iter().find(|t| t.context == context)
    }

    pub fn validated_tiers(&self) -> impl Iterator<Item = &TierResult> {
        self.tiers.iter().filter(|t| t.validated)
    }

    pub fn languages_validated(&self) -> Vec<String> {
        self.functional
            .as_ref()
            .map(FunctionalScores::languages_validated)
            .unwrap_or_default()
    }

    pub fn reasoning_avg(&self) -> f64 {
        self.functional.as_ref().map_or(0.0, |f| f.reasoning_avg)
    }
}
