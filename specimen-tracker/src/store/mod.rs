//! Resource store
//!
//! Create, list and look up projects, samples, methods, stages, files and
//! users. Records are addressed by their obfuscated external id or, where a
//! natural key exists, by name.
//!
//! Inserts are two-phase: the row is written, its id is encoded, and the
//! external id is written back, all inside one transaction.

pub(crate) mod files;
mod methods;
mod projects;
mod samples;
pub(crate) mod stages;
mod users;

pub use files::FileFilter;
pub use users::PENDING_STATUS;

use specimen_common::{Error, Obfuscator, ResourceKind, Result};
use sqlx::{SqliteConnection, SqlitePool};

/// How a caller names a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Obfuscated external id
    External(&'a str),
    /// Natural key (project or method name, sample name within a project)
    Name(&'a str),
}

impl<'a> Lookup<'a> {
    /// The text the caller used, for error messages
    pub fn key(&self) -> &'a str {
        match *self {
            Lookup::External(key) | Lookup::Name(key) => key,
        }
    }
}

/// Persistent store of every tracked resource
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    ids: Obfuscator,
}

impl Store {
    pub fn new(pool: SqlitePool, ids: Obfuscator) -> Self {
        Self { pool, ids }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn ids(&self) -> &Obfuscator {
        &self.ids
    }

    /// Internal id named by an external id of `kind`, if it decodes at all
    pub(crate) fn internal_id(&self, kind: ResourceKind, external_id: &str) -> Option<i64> {
        self.ids.decode(kind, external_id)
    }
}

/// Second phase of an insert: encode the new row id and store it
pub(crate) async fn assign_external_id(
    conn: &mut SqliteConnection,
    ids: &Obfuscator,
    kind: ResourceKind,
    id: i64,
) -> Result<String> {
    let external_id = ids.encode(kind, id)?;
    let sql = format!("UPDATE {} SET external_id = ? WHERE id = ?", kind.table());
    let updated = sqlx::query(&sql)
        .bind(&external_id)
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| {
            Error::from_insert(e, || {
                format!("external id {} is already in use", external_id)
            })
        })?
        .rows_affected();

    if updated != 1 {
        return Err(Error::Internal(format!(
            "{} {} vanished before its external id was assigned",
            kind.label(),
            id
        )));
    }
    Ok(external_id)
}

/// Trimmed, non-empty name or [`Error::InvalidInput`]
pub(crate) fn required_name<'a>(what: &str, name: &'a str) -> Result<&'a str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{} name must not be empty", what)));
    }
    Ok(name)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use specimen_common::db::init_memory_database;

    pub async fn memory_store() -> Store {
        let pool = init_memory_database().await.unwrap();
        Store::new(pool, Obfuscator::default())
    }
}
