pub mod pool;

use pool::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[("001_initial", include_str!("migrations/001_initial.sql"))];

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    pool.write(|conn| {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            )",
        )?;

        for (name, sql) in MIGRATIONS {
            let applied: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;

            if !applied {
                conn.execute_batch(sql)?;
                conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
                tracing::info!("applied migration: {}", name);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
pub(crate) fn temp_db_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tenantd-test-{}.db", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let path = temp_db_path();
        let pool = DbPool::open(path.to_str().unwrap(), 1).unwrap();
        run_migrations(&pool).unwrap();

        pool.read(|conn| {
            let tables: Vec<String> = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?
                .query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();

            assert!(tables.contains(&"_migrations".to_string()));
            assert!(tables.contains(&"tenants".to_string()));
            assert!(tables.contains(&"operation_events".to_string()));
            Ok(())
        })
        .unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_migrations_idempotent() {
        let path = temp_db_path();
        let pool = DbPool::open(path.to_str().unwrap(), 1).unwrap();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap();
        let applied: i64 = pool
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
        let _ = std::fs::remove_file(&path);
    }
}
