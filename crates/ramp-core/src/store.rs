use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RampResult;
use crate::record::{BenchmarkRecord, SCHEMA_VERSION};
use crate::tier::TierResult;

/// One row of the append-only tier history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHistoryEntry {
    pub id: String,
    pub model: String,
    pub run_date: DateTime<Utc>,
    pub tier: TierResult,
}

pub trait ResultStore {
    fn load(&self, model: &str) -> RampResult<Option<BenchmarkRecord>>;

    /// Replace the model's record and append its tiers to the history, as a
    /// single unit: readers see either the old record or the new one.
    fn save(&self, model: &str, record: &BenchmarkRecord) -> RampResult<()>;

    fn list(&self) -> RampResult<Vec<BenchmarkRecord>>;

    fn tier_history(&self, model: &str, limit: usize) -> RampResult<Vec<TierHistoryEntry>>;

    fn delete(&self, model: &str) -> RampResult<bool>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessPolicy {
    /// Re-run records older than this. `None` keeps records forever.
    pub max_age_days: Option<u32>,
}

impl StalenessPolicy {
    pub fn is_stale(&self, record: &BenchmarkRecord, now: DateTime<Utc>) -> bool {
        if !record.complete || record.schema_version < SCHEMA_VERSION {
            return true;
        }
        match self.max_age_days {
            Some(days) => now - record.run_date > Duration::days(i64::from(days)),
            None => false,
        }
    }
}

pub fn is_stale(record: &BenchmarkRecord, policy: &StalenessPolicy) -> bool {
    policy.is_stale(record, Utc::now())
}
