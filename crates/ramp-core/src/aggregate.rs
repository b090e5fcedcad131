//! Folds one model's tier results and probe scores into its record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::grades::{efficiency_ratio, is_permissive_license, GradeThresholds};
use crate::model::ModelSpec;
use crate::needle::tier_key;
use crate::record::{BenchmarkRecord, FunctionalScores, HaltReason, SCHEMA_VERSION};
use crate::tier::{TierMetrics, TierResult};

/// Minimum number of supported languages for each multilingual tag.
pub const MULTILINGUAL_FULL: usize = 5;
pub const MULTILINGUAL_PARTIAL: usize = 2;

pub struct RunSummary {
    pub tiers: Vec<TierResult>,
    pub halt_reason: HaltReason,
    pub functional: Option<FunctionalScores>,
    pub detected_license: String,
    pub run_date: DateTime<Utc>,
    /// An operator ceiling cut tiers the model declares.
    pub ladder_truncated: bool,
    pub size_gb: Option<f64>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn round(v: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (v * p).round() / p
}

fn failure_reason(tiers: &[TierResult], halt: HaltReason) -> String {
    match tiers.last() {
        None if halt == HaltReason::InsufficientHeadroom => {
            "insufficient memory headroom before the first tier".to_string()
        }
        None => "declared context is below the smallest tier".to_string(),
        Some(t) => match &t.error {
            Some(err) => format!("{} at {} tokens: {err}", t.outcome, t.context),
            None => format!("{} at {} tokens", t.outcome, t.context),
        },
    }
}

pub fn capability_tags(
    functional: Option<&FunctionalScores>,
    detected_license: &str,
) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(f) = functional {
        if f.tools_tested && f.tool_success_rate >= 1.0 {
            tags.push("tools_validated".to_string());
        }
        if f.json_schema_compliance_rate >= 1.0 {
            tags.push("json_validated".to_string());
        }
        let langs = f.languages_validated().len();
        if langs >= MULTILINGUAL_FULL {
            tags.push("multilingual_full".to_string());
        } else if langs >= MULTILINGUAL_PARTIAL {
            tags.push("multilingual_partial".to_string());
        }
    }
    if is_permissive_license(detected_license) {
        tags.push("license_permissive".to_string());
    }
    tags
}

pub fn aggregate(spec: &ModelSpec, run: RunSummary, grades: &GradeThresholds) -> BenchmarkRecord {
    let RunSummary {
        tiers,
        halt_reason,
        functional,
        detected_license,
        run_date,
        ladder_truncated,
        size_gb,
    } = run;

    let best = tiers.iter().filter(|t| t.validated).max_by_key(|t| t.context);
    let max_validated_context = best.map(|t| t.context);
    let ram_at_max_context_gb = best
        .and_then(|t| t.metrics.as_ref())
        .map(|m| m.peak_ram_gb);

    // Averages come from validated tiers, or from every measured tier when
    // nothing validated.
    let mut basis: Vec<(&TierResult, &TierMetrics)> = tiers
        .iter()
        .filter(|t| t.validated)
        .filter_map(|t| t.metrics.as_ref().map(|m| (t, m)))
        .collect();
    if basis.is_empty() {
        basis = tiers
            .iter()
            .filter_map(|t| t.metrics.as_ref().map(|m| (t, m)))
            .collect();
    }

    let avg_tokens_per_second = round(
        mean(basis.iter().map(|(_, m)| m.tokens_per_second)).unwrap_or(0.0),
        2,
    );
    let avg_ttft_ms = mean(basis.iter().filter_map(|(_, m)| m.ttft_ms)).map(f64::round);
    let co2_per_1k_tokens_kg = mean(
        basis
            .iter()
            .filter_map(|(t, m)| t.energy.map(|e| e.co2_per_1k_tokens_kg(m.total_tokens()))),
    )
    .unwrap_or(0.0);

    let total_co2_kg: f64 = tiers
        .iter()
        .filter_map(|t| t.energy.map(|e| e.emissions_kg))
        .sum();
    let energy_degraded = tiers
        .iter()
        .any(|t| t.energy.is_some_and(|e| e.degraded));

    let needle_in_haystack: BTreeMap<_, _> = tiers
        .iter()
        .filter_map(|t| t.needle.clone().map(|n| (tier_key(t.context), n)))
        .collect();

    // No probe run means no reasoning score, so no grade either.
    let ratio = functional
        .as_ref()
        .and_then(|f| efficiency_ratio(f.reasoning_avg, co2_per_1k_tokens_kg))
        .map(|r| round(r, 1));
    let complete = functional.is_some() && !ladder_truncated;

    let capabilities_validated = capability_tags(functional.as_ref(), &detected_license);
    let failure_reason = max_validated_context
        .is_none()
        .then(|| failure_reason(&tiers, halt_reason));

    BenchmarkRecord {
        model: spec.identity.name.clone(),
        tag: spec.identity.tag.clone(),
        kind: spec.kind,
        schema_version: SCHEMA_VERSION,
        run_date,
        complete,
        size_gb,
        max_validated_context,
        ram_at_max_context_gb,
        avg_tokens_per_second,
        avg_ttft_ms,
        total_co2_kg,
        co2_per_1k_tokens_kg,
        energy_degraded,
        functional,
        needle_in_haystack,
        ux_rating: grades.ux_rating(avg_ttft_ms),
        efficiency_ratio: ratio,
        efficiency_grade: grades.efficiency_grade(ratio),
        detected_license,
        capabilities_validated,
        halt_reason,
        failure_reason,
        tiers,
    }
}
