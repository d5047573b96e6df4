use rusqlite::{Connection, Transaction};
use std::sync::Mutex;

/// One writer connection and a handful of readers over the same WAL database.
pub struct DbPool {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
}

impl DbPool {
    pub fn open(path: &str, reader_count: usize) -> anyhow::Result<Self> {
        let writer = Connection::open(path)?;
        writer.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        let reader_count = reader_count.max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let r = Connection::open(path)?;
            r.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            readers.push(Mutex::new(r));
        }

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
        })
    }

    pub fn write<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T>,
    {
        let conn = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("writer lock poisoned"))?;
        f(&conn)
    }

    /// Run `f` inside a write transaction. Any error rolls the transaction back.
    pub fn transaction<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> anyhow::Result<T>,
    {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    pub fn read<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T>,
    {
        for reader in &self.readers {
            if let Ok(conn) = reader.try_lock() {
                return f(&conn);
            }
        }
        let conn = self.readers[0]
            .lock()
            .map_err(|_| anyhow::anyhow!("reader lock poisoned"))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pool() -> (DbPool, std::path::PathBuf) {
        let path = crate::db::temp_db_path();
        let pool = DbPool::open(path.to_str().unwrap(), 2).unwrap();
        pool.write(|conn| {
            conn.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER NOT NULL)")?;
            Ok(())
        })
        .unwrap();
        (pool, path)
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let (pool, path) = temp_pool();
        let result: anyhow::Result<()> = pool.transaction(|tx| {
            tx.execute("INSERT INTO kv (k, v) VALUES ('a', 1)", [])?;
            anyhow::bail!("abort");
        });
        assert!(result.is_err());

        let count: i64 = pool
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_committed_transaction_is_visible_to_readers() {
        let (pool, path) = temp_pool();
        pool.transaction(|tx| {
            tx.execute("INSERT INTO kv (k, v) VALUES ('a', 1)", [])?;
            Ok(())
        })
        .unwrap();
        let v: i64 = pool
            .read(|conn| Ok(conn.query_row("SELECT v FROM kv WHERE k = 'a'", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(v, 1);
        let _ = std::fs::remove_file(&path);
    }
}
