use crate::config::PortsConfig;
use crate::store::StoreError;
use anyhow::Result;

/// First port in the configured range that is neither reserved nor in `used`.
pub fn first_free(used: &[u16], ports: &PortsConfig) -> Option<u16> {
    let [low, high] = ports.range;
    (low..=high).find(|p| !ports.reserved.contains(p) && !used.contains(p))
}

/// Find the first available host port not already assigned to a tenant.
/// Must be called inside the transaction that inserts the tenant.
pub fn allocate_port(conn: &rusqlite::Connection, ports: &PortsConfig) -> Result<u16> {
    let mut stmt = conn.prepare("SELECT host_port FROM tenants WHERE host_port IS NOT NULL")?;
    let used_ports: Vec<u16> = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .filter_map(|r| r.ok())
        .map(|p| p as u16)
        .collect();

    match first_free(&used_ports, ports) {
        Some(port) => Ok(port),
        None => Err(StoreError::NoFreePort {
            low: ports.range[0],
            high: ports.range[1],
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::DbPool;
    use crate::db::{run_migrations, temp_db_path};

    fn ports(range: [u16; 2], reserved: &[u16]) -> PortsConfig {
        PortsConfig {
            range,
            reserved: reserved.to_vec(),
        }
    }

    fn test_db() -> (DbPool, std::path::PathBuf) {
        let path = temp_db_path();
        let db = DbPool::open(path.to_str().unwrap(), 1).unwrap();
        run_migrations(&db).unwrap();
        (db, path)
    }

    fn insert_tenant(db: &DbPool, id: &str, port: u16) {
        db.write(|conn| {
            conn.execute(
                "INSERT INTO tenants (id, subdomain, desired_image, plan, memory_mb, cpu_limit, host_port)
                 VALUES (?1, ?1, 'img', 'basic', 512, 0.5, ?2)",
                rusqlite::params![id, port as i64],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_first_free_skips_reserved() {
        let cfg = ports([8000, 8003], &[8000, 8001]);
        assert_eq!(first_free(&[], &cfg), Some(8002));
        assert_eq!(first_free(&[8002, 8003], &cfg), None);
    }

    #[test]
    fn test_allocate_port_returns_first_available() {
        let (db, path) = test_db();
        let port = db
            .write(|conn| allocate_port(conn, &PortsConfig::default()))
            .unwrap();
        assert_eq!(port, 8001);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_allocate_port_skips_used() {
        let (db, path) = test_db();
        insert_tenant(&db, "t1", 8001);
        insert_tenant(&db, "t2", 8002);
        let port = db
            .write(|conn| allocate_port(conn, &PortsConfig::default()))
            .unwrap();
        assert_eq!(port, 8003);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_allocate_port_exhausted_returns_error() {
        let (db, path) = test_db();
        insert_tenant(&db, "t1", 9001);
        let result = db.write(|conn| allocate_port(conn, &ports([9000, 9001], &[9000])));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("no available port"));
        let _ = std::fs::remove_file(&path);
    }
}
