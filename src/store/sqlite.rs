use super::{EventOutcome, OperationEvent, StoreError, TenantStore, DEFAULT_EVENT_CAP};
use crate::config::PortsConfig;
use crate::db::pool::DbPool;
use crate::tenant::allocator::allocate_port;
use crate::tenant::{ContainerRecord, ContainerStatus, ResourceLimits, Tenant, TenantDraft};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

const TENANT_COLUMNS: &str = "id, subdomain, desired_image, plan, memory_mb, cpu_limit, \
     host_port, container_id, container_status, last_synced_at, last_error, created_at";

pub struct SqliteTenantStore {
    db: Arc<DbPool>,
    ports: PortsConfig,
    event_cap: usize,
}

/// Raw column values; converted outside the rusqlite row callback.
struct TenantRow {
    id: String,
    subdomain: Option<String>,
    desired_image: String,
    plan: String,
    memory_mb: i64,
    cpu_limit: f64,
    host_port: Option<i64>,
    container_id: Option<String>,
    container_status: String,
    last_synced_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
}

impl TenantRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subdomain: row.get(1)?,
            desired_image: row.get(2)?,
            plan: row.get(3)?,
            memory_mb: row.get(4)?,
            cpu_limit: row.get(5)?,
            host_port: row.get(6)?,
            container_id: row.get(7)?,
            container_status: row.get(8)?,
            last_synced_at: row.get(9)?,
            last_error: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_tenant(self) -> anyhow::Result<Tenant> {
        let status = ContainerStatus::parse(&self.container_status).ok_or_else(|| {
            anyhow!(
                "tenant {} has unknown container status {:?}",
                self.id,
                self.container_status
            )
        })?;
        let last_synced_at = self.last_synced_at.as_deref().map(parse_ts).transpose()?;
        Ok(Tenant {
            created_at: parse_ts(&self.created_at)?,
            tenant_id: self.id,
            subdomain: self.subdomain,
            desired_image: self.desired_image,
            resource_limits: ResourceLimits {
                memory_mb: self.memory_mb as u32,
                cpu_limit: self.cpu_limit,
            },
            plan: self.plan,
            host_port: self.host_port.map(|p| p as u16),
            record: ContainerRecord {
                container_id: self.container_id,
                status,
                last_synced_at,
                last_error: self.last_error,
            },
        })
    }
}

fn parse_ts(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {:?}", raw))?
        .with_timezone(&Utc))
}

fn load_tenant(conn: &Connection, tenant_id: &str) -> anyhow::Result<Option<Tenant>> {
    let sql = format!("SELECT {} FROM tenants WHERE id = ?1", TENANT_COLUMNS);
    let row = conn
        .query_row(&sql, [tenant_id], TenantRow::from_row)
        .optional()?;
    row.map(TenantRow::into_tenant).transpose()
}

impl SqliteTenantStore {
    pub fn new(db: Arc<DbPool>, ports: PortsConfig) -> Self {
        Self {
            db,
            ports,
            event_cap: DEFAULT_EVENT_CAP,
        }
    }

    pub fn with_event_cap(mut self, cap: usize) -> Self {
        self.event_cap = cap.max(1);
        self
    }
}

impl TenantStore for SqliteTenantStore {
    fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError> {
        self.db
            .read(|conn| load_tenant(conn, tenant_id))
            .map_err(StoreError::from_anyhow)
    }

    fn list(&self) -> Result<Vec<Tenant>, StoreError> {
        self.db
            .read(|conn| {
                let sql = format!("SELECT {} FROM tenants ORDER BY created_at, id", TENANT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], TenantRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(TenantRow::into_tenant).collect()
            })
            .map_err(StoreError::from_anyhow)
    }

    fn insert(&self, draft: TenantDraft) -> Result<Tenant, StoreError> {
        self.db
            .transaction(|tx| {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM tenants WHERE id = ?1)",
                    [&draft.tenant_id],
                    |row| row.get(0),
                )?;
                if exists {
                    return Err(StoreError::TenantExists(draft.tenant_id.clone()).into());
                }
                if let Some(subdomain) = &draft.subdomain {
                    let taken: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM tenants WHERE subdomain = ?1)",
                        [subdomain],
                        |row| row.get(0),
                    )?;
                    if taken {
                        return Err(StoreError::SubdomainTaken(subdomain.clone()).into());
                    }
                }

                let port = allocate_port(tx, &self.ports)?;
                let tenant = draft.clone().into_tenant(Some(port), Utc::now());
                tx.execute(
                    "INSERT INTO tenants (id, subdomain, desired_image, plan, memory_mb, \
                     cpu_limit, host_port, container_status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        tenant.tenant_id,
                        tenant.subdomain,
                        tenant.desired_image,
                        tenant.plan,
                        tenant.resource_limits.memory_mb as i64,
                        tenant.resource_limits.cpu_limit,
                        port as i64,
                        tenant.record.status.as_str(),
                        tenant.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(tenant)
            })
            .map_err(StoreError::from_anyhow)
    }

    fn update_record(
        &self,
        tenant_id: &str,
        update: &mut dyn FnMut(&mut ContainerRecord),
    ) -> Result<ContainerRecord, StoreError> {
        self.db
            .transaction(|tx| {
                let mut record = match load_tenant(tx, tenant_id)? {
                    Some(tenant) => tenant.record,
                    None => return Err(StoreError::UnknownTenant(tenant_id.to_string()).into()),
                };
                update(&mut record);
                tx.execute(
                    "UPDATE tenants SET container_id = ?1, container_status = ?2, \
                     last_synced_at = ?3, last_error = ?4 WHERE id = ?5",
                    params![
                        record.container_id,
                        record.status.as_str(),
                        record.last_synced_at.map(|t| t.to_rfc3339()),
                        record.last_error,
                        tenant_id,
                    ],
                )?;
                Ok(record)
            })
            .map_err(StoreError::from_anyhow)
    }

    fn append_event(&self, event: &OperationEvent) -> Result<(), StoreError> {
        self.db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO operation_events (tenant_id, operation, outcome, message, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        event.tenant_id,
                        event.operation.as_str(),
                        event.outcome.as_str(),
                        event.message,
                        event.recorded_at.to_rfc3339(),
                    ],
                )?;
                tx.execute(
                    "DELETE FROM operation_events WHERE tenant_id = ?1 AND id NOT IN (
                         SELECT id FROM operation_events WHERE tenant_id = ?1
                         ORDER BY id DESC LIMIT ?2)",
                    params![event.tenant_id, self.event_cap as i64],
                )?;
                Ok(())
            })
            .map_err(StoreError::from_anyhow)
    }

    fn events(&self, tenant_id: &str, limit: usize) -> Result<Vec<OperationEvent>, StoreError> {
        self.db
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT operation, outcome, message, recorded_at FROM operation_events
                     WHERE tenant_id = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![tenant_id, limit as i64], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(|(operation, outcome, message, recorded_at)| {
                        Ok(OperationEvent {
                            tenant_id: tenant_id.to_string(),
                            operation: operation.parse().map_err(|e: String| anyhow!(e))?,
                            outcome: match outcome.as_str() {
                                "success" => EventOutcome::Success,
                                _ => EventOutcome::Error,
                            },
                            message,
                            recorded_at: parse_ts(&recorded_at)?,
                        })
                    })
                    .collect()
            })
            .map_err(StoreError::from_anyhow)
    }
}
