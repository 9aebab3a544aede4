use specimen_common::db::{Identity, Project};
use specimen_common::{Error, ResourceKind, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use super::{assign_external_id, required_name, Lookup, Store};
use crate::tx::begin_write;

const SELECT_PROJECT: &str = "SELECT id, external_id, name, sample_mask FROM project";

fn project_from_row(row: &SqliteRow) -> Project {
    Project {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        name: row.get("name"),
        sample_mask: row.get("sample_mask"),
    }
}

impl Store {
    /// Create a project; names are unique
    pub async fn add_project(&self, name: &str, sample_mask: &str) -> Result<Project> {
        let name = required_name("project", name)?;

        let mut tx = begin_write(&self.pool, "store::add_project").await?;
        let id = sqlx::query("INSERT INTO project (name, sample_mask) VALUES (?, ?)")
            .bind(name)
            .bind(sample_mask)
            .execute(tx.conn())
            .await
            .map_err(|e| Error::from_insert(e, || format!("project \"{}\" already exists", name)))?
            .last_insert_rowid();
        let external_id =
            assign_external_id(tx.conn(), &self.ids, ResourceKind::Project, id).await?;
        tx.commit().await?;

        info!("Created project {} ({})", name, external_id);
        Ok(Project {
            identity: Identity::new(id, external_id),
            name: name.to_string(),
            sample_mask: sample_mask.to_string(),
        })
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_PROJECT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    pub async fn find_project(&self, lookup: Lookup<'_>) -> Result<Option<Project>> {
        let row = match lookup {
            Lookup::External(external_id) => {
                let Some(id) = self.internal_id(ResourceKind::Project, external_id) else {
                    return Ok(None);
                };
                sqlx::query(&format!("{} WHERE id = ?", SELECT_PROJECT))
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            Lookup::Name(name) => {
                sqlx::query(&format!("{} WHERE name = ?", SELECT_PROJECT))
                    .bind(name.trim())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.as_ref().map(project_from_row))
    }

    pub async fn get_project(&self, lookup: Lookup<'_>) -> Result<Project> {
        self.find_project(lookup)
            .await?
            .ok_or_else(|| Error::not_found("project", lookup.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::memory_store;
    use super::*;

    #[tokio::test]
    async fn test_add_project_assigns_external_id() {
        let store = memory_store().await;
        let project = store.add_project("Manhattan", "man-###").await.unwrap();
        assert_eq!(project.identity.id, 1);
        assert_eq!(project.identity.external_id, "PqrX9");

        let second = store.add_project("Brooklyn", "").await.unwrap();
        assert_eq!(second.identity.external_id, "84z39");
    }

    #[tokio::test]
    async fn test_project_lookups() {
        let store = memory_store().await;
        let created = store.add_project("Manhattan", "man-###").await.unwrap();

        let by_id = store.get_project(Lookup::External("PqrX9")).await.unwrap();
        let by_name = store.get_project(Lookup::Name("Manhattan")).await.unwrap();
        assert_eq!(by_id, created);
        assert_eq!(by_name, created);

        assert!(store.find_project(Lookup::External("84z39")).await.unwrap().is_none());
        assert!(store.find_project(Lookup::External("garbage")).await.unwrap().is_none());

        let err = store.get_project(Lookup::Name("Queens")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "project", .. }));
    }

    #[tokio::test]
    async fn test_duplicate_project_name_is_integrity_error() {
        let store = memory_store().await;
        store.add_project("Manhattan", "").await.unwrap();
        let err = store.add_project("Manhattan", "").await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)), "{:?}", err);

        // the failed insert must not have burned an external id
        assert_eq!(store.list_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_project_name_is_rejected() {
        let store = memory_store().await;
        let err = store.add_project("   ", "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
