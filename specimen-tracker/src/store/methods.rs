use specimen_common::db::{Identity, Method};
use specimen_common::{Error, ResourceKind, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use super::{assign_external_id, required_name, Lookup, Store};
use crate::tx::begin_write;

const SELECT_METHOD: &str = "SELECT id, external_id, name, description FROM method";

fn method_from_row(row: &SqliteRow) -> Method {
    Method {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        name: row.get("name"),
        description: row.get("description"),
    }
}

impl Store {
    pub async fn add_method(&self, name: &str, description: &str) -> Result<Method> {
        let name = required_name("method", name)?;

        let mut tx = begin_write(&self.pool, "store::add_method").await?;
        let id = sqlx::query("INSERT INTO method (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(tx.conn())
            .await
            .map_err(|e| Error::from_insert(e, || format!("method \"{}\" already exists", name)))?
            .last_insert_rowid();
        let external_id =
            assign_external_id(tx.conn(), &self.ids, ResourceKind::Method, id).await?;
        tx.commit().await?;

        info!("Created method {} ({})", name, external_id);
        Ok(Method {
            identity: Identity::new(id, external_id),
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    pub async fn list_methods(&self) -> Result<Vec<Method>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_METHOD))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(method_from_row).collect())
    }

    pub async fn find_method(&self, lookup: Lookup<'_>) -> Result<Option<Method>> {
        let row = match lookup {
            Lookup::External(external_id) => {
                let Some(id) = self.internal_id(ResourceKind::Method, external_id) else {
                    return Ok(None);
                };
                sqlx::query(&format!("{} WHERE id = ?", SELECT_METHOD))
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            Lookup::Name(name) => {
                sqlx::query(&format!("{} WHERE name = ?", SELECT_METHOD))
                    .bind(name.trim())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.as_ref().map(method_from_row))
    }

    pub async fn get_method(&self, lookup: Lookup<'_>) -> Result<Method> {
        self.find_method(lookup)
            .await?
            .ok_or_else(|| Error::not_found("method", lookup.key()))
    }
}
