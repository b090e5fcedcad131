use rusqlite::Connection;

use ramp_core::RampError;

pub fn init_db(conn: &Connection) -> Result<(), RampError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS benchmark_records (
            model TEXT PRIMARY KEY,
            tag TEXT NOT NULL,
            kind TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            run_date TEXT NOT NULL,
            complete INTEGER NOT NULL DEFAULT 0,
            max_validated_context INTEGER,
            halt_reason TEXT NOT NULL,
            record TEXT NOT NULL -- JSON BenchmarkRecord
        );

        CREATE INDEX IF NOT EXISTS idx_records_tag ON benchmark_records(tag);
        CREATE INDEX IF NOT EXISTS idx_records_run_date ON benchmark_records(run_date);

        -- Append-only: one row per attempted tier per run
        CREATE TABLE IF NOT EXISTS tier_history (
            id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            run_date TEXT NOT NULL,
            context INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            tier TEXT NOT NULL -- JSON TierResult
        );

        CREATE INDEX IF NOT EXISTS idx_tier_history_model ON tier_history(model, run_date);
        ",
    )
    .map_err(|e| RampError::Database(e.to_string()))?;

    Ok(())
}
