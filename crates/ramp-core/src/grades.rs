//! Qualitative grades derived from raw measurements.

use serde::{Deserialize, Serialize};

use crate::record::{EfficiencyGrade, UxRating};

/// Breakpoints for the UX and efficiency grades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    pub instant_ms: f64,
    pub fast_ms: f64,
    pub acceptable_ms: f64,
    pub excellent_ratio: f64,
    pub good_ratio: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            instant_ms: 300.0,
            fast_ms: 800.0,
            acceptable_ms: 1500.0,
            excellent_ratio: 500.0,
            good_ratio: 200.0,
        }
    }
}

impl GradeThresholds {
    pub fn ux_rating(&self, avg_ttft_ms: Option<f64>) -> UxRating {
        match avg_ttft_ms {
            Some(ms) if ms > 0.0 => {
                if ms < self.instant_ms {
                    UxRating::Instant
                } else if ms < self.fast_ms {
                    UxRating::Fast
                } else if ms < self.acceptable_ms {
                    UxRating::Acceptable
                } else {
                    UxRating::Slow
                }
            }
            _ => UxRating::NotAvailable,
        }
    }

    pub fn efficiency_grade(&self, ratio: Option<f64>) -> EfficiencyGrade {
        match ratio {
            Some(r) if r > self.excellent_ratio => EfficiencyGrade::Excellent,
            Some(r) if r > self.good_ratio => EfficiencyGrade::Good,
            Some(_) => EfficiencyGrade::Poor,
            None => EfficiencyGrade::NotAvailable,
        }
    }
}

/// Reasoning points (0-100) per gram of CO2e per thousand tokens.
pub fn efficiency_ratio(reasoning_avg: f64, co2_per_1k_tokens_kg: f64) -> Option<f64> {
    let grams = co2_per_1k_tokens_kg * 1000.0;
    if grams > 0.0 {
        Some(reasoning_avg * 100.0 / grams)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// License
// ---------------------------------------------------------------------------

pub const LICENSE_NOT_DETECTED: &str = "not detected";
pub const LICENSE_NOT_APPLICABLE: &str = "n/a";

/// Classify raw license text from model metadata.
pub fn classify_license(text: Option<&str>) -> String {
    let text = match text.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => return LICENSE_NOT_DETECTED.to_string(),
    };

    let label = if text.contains("apache") && text.contains("2.0") {
        "Apache 2.0"
    } else if text.contains("mit license") {
        "MIT"
    } else if text.contains("llama") && text.contains("community") {
        "Llama Community"
    } else if text.contains("creative commons") {
        if text.contains("noncommercial") || text.contains("non-commercial") || text.contains("-nc") {
            "CC-BY-NC"
        } else {
            "CC-BY"
        }
    } else if text.contains("openrail") {
        "OpenRAIL"
    } else {
        "other"
    };
    label.to_string()
}

pub fn is_permissive_license(label: &str) -> bool {
    matches!(label, "Apache 2.0" | "MIT")
}
