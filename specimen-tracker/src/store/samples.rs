use specimen_common::db::{Identity, Sample};
use specimen_common::{time, Error, ResourceKind, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use super::{assign_external_id, required_name, Lookup, Store};
use crate::tx::begin_write;

const SELECT_SAMPLE: &str = r#"
    SELECT s.id, s.external_id, s.project_id, p.external_id AS project_external_id,
           s.name, s.created_at
    FROM sample s
    JOIN project p ON p.id = s.project_id
"#;

fn sample_from_row(row: &SqliteRow) -> Result<Sample> {
    let created_at: String = row.get("created_at");
    Ok(Sample {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        project_id: row.get("project_id"),
        project_external_id: row.get("project_external_id"),
        name: row.get("name"),
        created_at: time::from_db(&created_at)?,
    })
}

impl Store {
    /// Create a sample inside an existing project; names are unique per project
    pub async fn add_sample(&self, project: Lookup<'_>, name: &str) -> Result<Sample> {
        let name = required_name("sample", name)?;
        let project = self.get_project(project).await?;
        let created_at = time::now();

        let mut tx = begin_write(&self.pool, "store::add_sample").await?;
        let id = sqlx::query("INSERT INTO sample (project_id, name, created_at) VALUES (?, ?, ?)")
            .bind(project.identity.id)
            .bind(name)
            .bind(time::to_db(&created_at))
            .execute(tx.conn())
            .await
            .map_err(|e| {
                Error::from_insert(e, || {
                    format!("sample \"{}\" already exists in project {}", name, project.name)
                })
            })?
            .last_insert_rowid();
        let external_id =
            assign_external_id(tx.conn(), &self.ids, ResourceKind::Sample, id).await?;
        tx.commit().await?;

        info!(
            "Created sample {} ({}) in project {}",
            name, external_id, project.identity.external_id
        );
        Ok(Sample {
            identity: Identity::new(id, external_id),
            project_id: project.identity.id,
            project_external_id: project.identity.external_id,
            name: name.to_string(),
            created_at,
        })
    }

    /// Samples of one project in creation order
    pub async fn list_samples(&self, project: Lookup<'_>) -> Result<Vec<Sample>> {
        let project = self.get_project(project).await?;
        self.samples_of_project(project.identity.id).await
    }

    pub(crate) async fn samples_of_project(&self, project_id: i64) -> Result<Vec<Sample>> {
        let rows = sqlx::query(&format!("{} WHERE s.project_id = ? ORDER BY s.id", SELECT_SAMPLE))
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(sample_from_row).collect()
    }

    pub async fn find_sample(&self, external_id: &str) -> Result<Option<Sample>> {
        let Some(id) = self.internal_id(ResourceKind::Sample, external_id) else {
            return Ok(None);
        };
        let row = sqlx::query(&format!("{} WHERE s.id = ?", SELECT_SAMPLE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sample_from_row).transpose()
    }

    pub async fn get_sample(&self, external_id: &str) -> Result<Sample> {
        self.find_sample(external_id)
            .await?
            .ok_or_else(|| Error::not_found("sample", external_id))
    }

    /// A sample that must belong to `project`
    ///
    /// A sample that exists but lives in another project is reported as not
    /// found, so external ids cannot be probed across projects.
    pub async fn get_project_sample(
        &self,
        project: Lookup<'_>,
        sample: Lookup<'_>,
    ) -> Result<Sample> {
        let project = self.get_project(project).await?;
        let found = match sample {
            Lookup::External(external_id) => self.find_sample(external_id).await?,
            Lookup::Name(name) => {
                let row = sqlx::query(&format!(
                    "{} WHERE s.project_id = ? AND s.name = ?",
                    SELECT_SAMPLE
                ))
                .bind(project.identity.id)
                .bind(name.trim())
                .fetch_optional(&self.pool)
                .await?;
                row.as_ref().map(sample_from_row).transpose()?
            }
        };

        found
            .filter(|s| s.project_id == project.identity.id)
            .ok_or_else(|| Error::not_found("sample", sample.key()))
    }
}
