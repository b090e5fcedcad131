use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use ramp_core::{BenchmarkRecord, RampError, RampResult, ResultStore, TierHistoryEntry, TierResult};

use crate::schema::init_db;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(path: &Path) -> RampResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RampError::Database(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RampError::Database(format!("cannot open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| RampError::Database(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> RampResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RampError::Database(format!("cannot open in-memory db: {e}")))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Raw stored JSON for a model, exactly as written.
    pub fn raw_record(&self, model: &str) -> RampResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT record FROM benchmark_records WHERE model = ?1",
                params![model],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RampError::Database(e.to_string()))
    }

    pub fn count(&self) -> RampResult<usize> {
        self.conn
            .query_row("SELECT COUNT(*) FROM benchmark_records", [], |row| {
                row.get::<_, usize>(0)
            })
            .map_err(|e| RampError::Database(e.to_string()))
    }
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ---------------------------------------------------------------------------
// ResultStore impl
// ---------------------------------------------------------------------------

impl ResultStore for SqliteStore {
    fn load(&self, model: &str) -> RampResult<Option<BenchmarkRecord>> {
        match self.raw_record(model)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, model: &str, record: &BenchmarkRecord) -> RampResult<()> {
        let json = serde_json::to_string(record)?;
        let run_date = record.run_date.to_rfc3339();

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| RampError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO benchmark_records (model, tag, kind, schema_version, run_date,
             complete, max_validated_context, halt_reason, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(model) DO UPDATE SET
             tag = excluded.tag, kind = excluded.kind,
             schema_version = excluded.schema_version, run_date = excluded.run_date,
             complete = excluded.complete,
             max_validated_context = excluded.max_validated_context,
             halt_reason = excluded.halt_reason, record = excluded.record",
            params![
                model,
                record.tag,
                record.kind.to_string(),
                record.schema_version,
                run_date,
                record.complete,
                record.max_validated_context,
                record.halt_reason.to_string(),
                json,
            ],
        )
        .map_err(|e| RampError::Database(e.to_string()))?;

        for tier in &record.tiers {
            let tier_json = serde_json::to_string(tier)?;
            tx.execute(
                "INSERT INTO tier_history (id, model, run_date, context, outcome, tier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ulid::Ulid::new().to_string(),
                    model,
                    run_date,
                    tier.context,
                    tier.outcome.to_string(),
                    tier_json,
                ],
            )
            .map_err(|e| RampError::Database(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| RampError::Database(e.to_string()))?;
        tracing::debug!(model, tiers = record.tiers.len(), "record saved");
        Ok(())
    }

    fn list(&self) -> RampResult<Vec<BenchmarkRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT record FROM benchmark_records ORDER BY model")
            .map_err(|e| RampError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| RampError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let json = row.map_err(|e| RampError::Database(e.to_string()))?;
            match serde_json::from_str(&json) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }

    fn tier_history(&self, model: &str, limit: usize) -> RampResult<Vec<TierHistoryEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, model, run_date, tier FROM tier_history
                 WHERE model = ?1 ORDER BY run_date DESC, id DESC LIMIT ?2",
            )
            .map_err(|e| RampError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![model, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| RampError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, model, run_date, tier_json) =
                row.map_err(|e| RampError::Database(e.to_string()))?;
            let tier: TierResult = serde_json::from_str(&tier_json)?;
            entries.push(TierHistoryEntry {
                id,
                model,
                run_date: parse_dt(&run_date),
                tier,
            });
        }
        Ok(entries)
    }

    fn delete(&self, model: &str) -> RampResult<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM benchmark_records WHERE model = ?1",
                params![model],
            )
            .map_err(|e| RampError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
