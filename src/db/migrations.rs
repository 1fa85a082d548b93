use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Ordered schema steps. `user_version` records how many have been applied,
/// so appending a file here is the whole upgrade path.
const STEPS: [&str; 2] = [
    include_str!("schemas/schema_v1.sql"),
    include_str!("schemas/schema_v2.sql"),
];

/// Applies every schema step past the database's recorded version, one
/// transaction per step so an interrupted upgrade keeps its finished steps.
pub fn apply_pending(conn: &mut Connection) -> Result<()> {
    let recorded: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let applied = usize::try_from(recorded).context("user_version pragma is negative")?;

    if applied > STEPS.len() {
        bail!(
            "database schema version {} is newer than this build supports ({})",
            applied,
            STEPS.len()
        );
    }

    for (index, sql) in STEPS.iter().enumerate().skip(applied) {
        let target = index + 1;
        let tx = conn
            .transaction()
            .with_context(|| format!("failed to open transaction for schema step {target}"))?;
        tx.execute_batch(sql)
            .with_context(|| format!("schema step {target} failed"))?;
        tx.pragma_update(None, "user_version", target as i64)
            .with_context(|| format!("failed to record schema version {target}"))?;
        tx.commit()
            .with_context(|| format!("failed to commit schema step {target}"))?;
    }

    Ok(())
}
