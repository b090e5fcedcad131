//! `models.json` catalog: the model list to benchmark, and the place where a
//! projection of each record is mirrored for other tools to read.
//!
//! The file is hand-edited, so it is parsed leniently (comments, trailing
//! commas). Only the keys written here are touched; everything else in an
//! entry survives a rewrite in its original order.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Map, Value};

use ramp_core::model::DEFAULT_DECLARED_CONTEXT;
use ramp_core::{BenchmarkRecord, ModelKind, ModelSpec, RampError, RampResult};

pub struct ModelCatalog {
    path: PathBuf,
    entries: Map<String, Value>,
    backed_up: bool,
}

pub fn parse_catalog(text: &str) -> RampResult<Map<String, Value>> {
    let mut de = serde_json_lenient::Deserializer::from_str(text);
    de.set_allow_comments(true);
    de.set_ignore_trailing_commas(true);
    let value = Value::deserialize(&mut de)
        .map_err(|e| RampError::Config(format!("invalid catalog: {e}")))?;
    de.end()
        .map_err(|e| RampError::Config(format!("invalid catalog: {e}")))?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RampError::Config(
            "catalog must be an object keyed by model name".into(),
        )),
    }
}

fn entry_to_spec(name: &str, entry: &Value) -> Option<ModelSpec> {
    let tag = entry.get("ollama_tag").and_then(Value::as_str)?;
    let kind = entry
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<ModelKind>().ok())
        .unwrap_or_default();
    let declared_context = entry
        .get("ctx")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(DEFAULT_DECLARED_CONTEXT);
    let capabilities = entry
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|caps| {
            caps.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let active_params_b = entry.get("active_params_b").and_then(|v| match v {
        Value::String(s) => s.trim().trim_end_matches('B').trim().parse().ok(),
        other => other.as_f64(),
    });

    let mut spec = ModelSpec::local(name, tag, declared_context);
    spec.kind = kind;
    spec.capabilities = capabilities;
    spec.active_params_b = active_params_b;
    Some(spec)
}

/// The part of a record mirrored into the catalog entry.
pub fn benchmark_stats(record: &BenchmarkRecord) -> Value {
    let functional = record.functional.clone().unwrap_or_default();
    let needle: Map<String, Value> = record
        .needle_in_haystack
        .iter()
        .map(|(k, r)| {
            (
                k.clone(),
                json!({ "passed": r.passed(), "offsets": r.offsets }),
            )
        })
        .collect();

    let mut stats = json!({
        "date": record.run_date.format("%Y-%m-%d").to_string(),
        "schema_version": record.schema_version,
        "max_validated_ctx": record.max_validated_context,
        "ram_usage_at_max_ctx_gb": record.ram_at_max_context_gb,
        "avg_tokens_per_second": record.avg_tokens_per_second,
        "avg_ttft_ms": record.avg_ttft_ms,
        "ux_rating": record.ux_rating,
        "efficiency_grade": record.efficiency_grade,
        "efficiency_ratio": record.efficiency_ratio,
        "detected_license": record.detected_license,
        "total_co2_emissions_kg": record.total_co2_kg,
        "avg_co2_per_1k_tokens": record.co2_per_1k_tokens_kg,
        "energy_degraded": record.energy_degraded,
        "halt_reason": record.halt_reason,
        "tool_capability": {
            "tested": functional.tools_tested,
            "success_rate": functional.tool_success_rate,
            "restraint_rate": functional.tool_restraint_rate,
        },
        "json_capability": {
            "valid_json_rate": functional.json_valid_rate,
            "schema_compliance_rate": functional.json_schema_compliance_rate,
        },
        "needle_in_haystack": needle,
        "quality_scores": {
            "reasoning_avg": functional.reasoning_avg,
            "instruction_following_avg": functional.instruction_following_avg,
            "response_variance_avg": functional.response_variance,
        },
    });
    if let (Some(reason), Value::Object(map)) = (&record.failure_reason, &mut stats) {
        map.insert("failure_reason".into(), Value::String(reason.clone()));
    }
    stats
}

impl ModelCatalog {
    pub fn load(path: &Path) -> RampResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RampError::Io(format!("cannot read {}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            entries: parse_catalog(&text)?,
            backed_up: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Benchmarkable models in file order. Entries without an engine tag are
    /// skipped.
    pub fn specs(&self) -> Vec<ModelSpec> {
        self.entries
            .iter()
            .filter_map(|(name, entry)| {
                let spec = entry_to_spec(name, entry);
                if spec.is_none() {
                    tracing::debug!(model = %name, "catalog entry has no ollama_tag, skipping");
                }
                spec
            })
            .collect()
    }

    pub fn entry(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Mirror a record into its catalog entry. Returns false when the model is
    /// not in the catalog.
    pub fn merge_record(&mut self, record: &BenchmarkRecord) -> bool {
        let Some(Value::Object(entry)) = self.entries.get_mut(&record.model) else {
            tracing::warn!(model = %record.model, "model not in catalog, not mirrored");
            return false;
        };

        entry.insert("benchmark_stats".into(), benchmark_stats(record));
        if let Some(size) = record.size_gb {
            entry.insert("size_gb".into(), json!(size));
        }

        if let Some(functional) = &record.functional {
            let langs: Map<String, Value> = functional
                .languages
                .iter()
                .filter(|(_, r)| r.supported())
                .map(|(code, r)| {
                    (
                        code.clone(),
                        json!({ "comprehension": r.comprehension, "generation": r.generation }),
                    )
                })
                .collect();
            if !langs.is_empty() {
                entry.insert("languages_validated".into(), Value::Object(langs));
            }
        }
        if !record.capabilities_validated.is_empty() {
            entry.insert(
                "capabilities_validated".into(),
                json!(record.capabilities_validated),
            );
        }
        true
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Rewrite the file atomically. The first save of a session keeps a copy
    /// of the previous file next to it.
    pub fn save(&mut self) -> RampResult<()> {
        if !self.backed_up && self.path.exists() {
            let backup = self.backup_path();
            std::fs::copy(&self.path, &backup)
                .map_err(|e| RampError::Io(format!("cannot back up catalog: {e}")))?;
            tracing::info!(path = %backup.display(), "catalog backup written");
            self.backed_up = true;
        }

        let text = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, text + "\n")
            .map_err(|e| RampError::Io(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RampError::Io(format!("cannot replace catalog: {e}")))?;
        Ok(())
    }
}
