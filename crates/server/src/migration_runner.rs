//! Startup schema migrations for rusqlite.
//!
//! Applies the numbered SQL files under `migrations/` in order and records
//! each version in `schema_migrations` so reruns are no-ops.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use rusqlite::{params, Connection};
use tracing::info;

/// Apply pending migrations. Returns the number applied.
///
/// Must run before any other database access; the store assumes the
/// schema is current.
pub fn run_migrations(conn: &mut Connection) -> anyhow::Result<usize> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         CREATE TABLE IF NOT EXISTS schema_migrations (
             version INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
         );",
    )?;

    let mut applied = 0;
    for (version, (name, sql)) in load_migration_files()? {
        let already: bool = conn
            .prepare("SELECT COUNT(*) FROM schema_migrations WHERE version = ?1")?
            .query_row(params![version], |row| row.get::<_, i64>(0))
            .map(|n| n > 0)?;
        if already {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(&sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;

        info!(
            component = "migrations",
            event = "migration.applied",
            version = version,
            name = %name,
            "Applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}

/// Collect `NNN_name.sql` files keyed by numeric version, sorted by BTreeMap.
fn load_migration_files() -> anyhow::Result<BTreeMap<i64, (String, String)>> {
    let dir = find_migrations_dir()?;
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().is_none_or(|e| e != "sql") {
            continue;
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(version) = name.split('_').next().and_then(|v| v.parse().ok()) else {
            continue;
        };
        files.insert(version, (name, fs::read_to_string(&path)?));
    }
    Ok(files)
}

/// Walk up from CARGO_MANIFEST_DIR so both the binary and workspace tests
/// resolve the same `migrations/` directory.
fn find_migrations_dir() -> anyhow::Result<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for ancestor in manifest_dir.ancestors() {
        let candidate = ancestor.join("migrations");
        if candidate.is_dir() {
            return Ok(candidate);
        }
    }
    anyhow::bail!(
        "could not find migrations/ directory (searched from {})",
        manifest_dir.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = run_migrations(&mut conn).unwrap();
        assert!(first >= 1);

        // Second run is a no-op.
        let second = run_migrations(&mut conn).unwrap();
        assert_eq!(second, 0);

        // Core tables exist afterwards.
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('sessions', 'questions', 'answers', 'scores', 'category_scores')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }
}
