use super::lease::{next_lease, Lease, LeaseStore};
use crate::schedule::lock;
use crate::sqlite_column;
use crate::sqlite_persistence::{open_versioned, Column, SqlType, Table, VersionedSchema};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const LEASES_TABLE_V1: Table = Table {
    name: "leases",
    columns: &[
        sqlite_column!("name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("holder", &SqlType::Text, non_null = true),
        sqlite_column!("epoch", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

const LEASE_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[LEASES_TABLE_V1],
    migration: None,
}];

/// Lease store backed by a SQLite file.
///
/// Nodes sharing the file (same host or a shared volume) elect a leader
/// through it. Acquisition runs in an IMMEDIATE transaction so two nodes
/// can't both take an expired lease.
pub struct SqliteLeaseStore {
    conn: Mutex<Connection>,
}

impl SqliteLeaseStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), LEASE_SCHEMAS, "lease")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout on lease database")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn read_lease(conn: &Connection, name: &str) -> rusqlite::Result<Option<Lease>> {
    conn.query_row(
        "SELECT name, holder, epoch, expires_at FROM leases WHERE name = ?1",
        params![name],
        |row| {
            Ok(Lease {
                name: row.get(0)?,
                holder: row.get(1)?,
                epoch: row.get::<_, i64>(2)? as u64,
                expires_at_ms: row.get(3)?,
            })
        },
    )
    .optional()
}

impl LeaseStore for SqliteLeaseStore {
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now_ms: i64,
    ) -> Result<Option<Lease>> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = read_lease(&tx, name)?;
        let Some(lease) = next_lease(existing.as_ref(), name, holder, ttl, now_ms) else {
            return Ok(None);
        };

        tx.execute(
            "INSERT INTO leases (name, holder, epoch, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                epoch = excluded.epoch,
                expires_at = excluded.expires_at",
            params![lease.name, lease.holder, lease.epoch as i64, lease.expires_at_ms],
        )?;
        tx.commit()?;
        Ok(Some(lease))
    }

    fn release(&self, name: &str, holder: &str) -> Result<bool> {
        let conn = lock(&self.conn);
        let updated = conn.execute(
            "UPDATE leases SET holder = '', expires_at = 0 WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(updated > 0)
    }

    fn current(&self, name: &str) -> Result<Option<Lease>> {
        let conn = lock(&self.conn);
        Ok(read_lease(&conn, name)?.filter(|l| !l.holder.is_empty()))
    }
}
