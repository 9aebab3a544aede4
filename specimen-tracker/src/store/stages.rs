use specimen_common::db::{Identity, Stage};
use specimen_common::{time, Error, ResourceKind, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::Store;

pub(crate) const SELECT_STAGE: &str = r#"
    SELECT st.id, st.external_id, st.sample_id, st.method_id,
           s.external_id AS sample_external_id, m.external_id AS method_external_id,
           (SELECT COUNT(*) FROM stage prior
            WHERE prior.sample_id = st.sample_id AND prior.id <= st.id) AS position,
           st.annotation, st.alt_id, st.created_at
    FROM stage st
    JOIN sample s ON s.id = st.sample_id
    JOIN method m ON m.id = st.method_id
"#;

pub(crate) fn stage_from_row(row: &SqliteRow) -> Result<Stage> {
    let created_at: String = row.get("created_at");
    Ok(Stage {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        sample_id: row.get("sample_id"),
        method_id: row.get("method_id"),
        sample_external_id: row.get("sample_external_id"),
        method_external_id: row.get("method_external_id"),
        position: row.get("position"),
        annotation: row.get("annotation"),
        alt_id: row.get("alt_id"),
        created_at: time::from_db(&created_at)?,
    })
}

/// One stage by internal id on an open connection
pub(crate) async fn stage_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Stage> {
    let row = sqlx::query(&format!("{} WHERE st.id = ?", SELECT_STAGE))
        .bind(id)
        .fetch_one(conn)
        .await?;
    stage_from_row(&row)
}

impl Store {
    /// A sample's stages in append order
    pub(crate) async fn stages_of_sample(&self, sample_id: i64) -> Result<Vec<Stage>> {
        let rows = sqlx::query(&format!("{} WHERE st.sample_id = ? ORDER BY st.id", SELECT_STAGE))
            .bind(sample_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stage_from_row).collect()
    }

    pub async fn find_stage(&self, external_id: &str) -> Result<Option<Stage>> {
        let Some(id) = self.internal_id(ResourceKind::Stage, external_id) else {
            return Ok(None);
        };
        let row = sqlx::query(&format!("{} WHERE st.id = ?", SELECT_STAGE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stage_from_row).transpose()
    }

    pub async fn get_stage(&self, external_id: &str) -> Result<Stage> {
        self.find_stage(external_id)
            .await?
            .ok_or_else(|| Error::not_found("stage", external_id))
    }

    /// A stage that must belong to `sample_external_id`
    pub async fn get_sample_stage(
        &self,
        sample_external_id: &str,
        stage_external_id: &str,
    ) -> Result<Stage> {
        let sample = self.get_sample(sample_external_id).await?;
        self.find_stage(stage_external_id)
            .await?
            .filter(|stage| stage.sample_id == sample.identity.id)
            .ok_or_else(|| Error::not_found("stage", stage_external_id))
    }
}
