use specimen_common::db::{FileStatus, Identity, StageFile};
use specimen_common::{time, Error, ResourceKind, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::Store;

pub(crate) const SELECT_FILE: &str = r#"
    SELECT f.id, f.external_id, f.stage_id, st.external_id AS stage_external_id,
           f.relative_source_path, f.relative_target_path, f.status,
           f.created_at, f.updated_at
    FROM stage_file f
    JOIN stage st ON st.id = f.stage_id
"#;

pub(crate) fn file_from_row(row: &SqliteRow) -> Result<StageFile> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(StageFile {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        stage_id: row.get("stage_id"),
        stage_external_id: row.get("stage_external_id"),
        relative_source_path: row.get("relative_source_path"),
        relative_target_path: row.get("relative_target_path"),
        status: status.parse()?,
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
    })
}

/// One file by internal id on an open connection
pub(crate) async fn file_by_id(conn: &mut SqliteConnection, id: i64) -> Result<StageFile> {
    let row = sqlx::query(&format!("{} WHERE f.id = ?", SELECT_FILE))
        .bind(id)
        .fetch_one(conn)
        .await?;
    file_from_row(&row)
}

/// Filters for [`Store::list_files`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFilter<'a> {
    pub stage: Option<&'a str>,
    pub status: Option<FileStatus>,
}

impl Store {
    pub async fn find_file(&self, external_id: &str) -> Result<Option<StageFile>> {
        let Some(id) = self.internal_id(ResourceKind::StageFile, external_id) else {
            return Ok(None);
        };
        let row = sqlx::query(&format!("{} WHERE f.id = ?", SELECT_FILE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    pub async fn get_file(&self, external_id: &str) -> Result<StageFile> {
        self.find_file(external_id)
            .await?
            .ok_or_else(|| Error::not_found("file", external_id))
    }

    /// Every file in `status`, oldest first; what the sweepers poll
    pub async fn files_in_state(&self, status: FileStatus) -> Result<Vec<StageFile>> {
        self.list_files(FileFilter {
            stage: None,
            status: Some(status),
        })
        .await
    }

    /// Number of uploads under `dir` whose bytes are not archived yet
    ///
    /// `dir` is relative to the upload area, without a trailing slash.
    pub async fn unarchived_uploads_under(&self, dir: &str) -> Result<i64> {
        let prefix = format!("{}/", dir);
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stage_file
            WHERE substr(relative_source_path, 1, length(?)) = ?
              AND status IN (?, ?)
            "#,
        )
        .bind(&prefix)
        .bind(&prefix)
        .bind(FileStatus::Prepared.as_str())
        .bind(FileStatus::Staged.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn list_files(&self, filter: FileFilter<'_>) -> Result<Vec<StageFile>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_FILE);
        query.push(" WHERE 1 = 1");

        if let Some(stage) = filter.stage {
            let stage = self.get_stage(stage).await?;
            query.push(" AND f.stage_id = ").push_bind(stage.identity.id);
        }
        if let Some(status) = filter.status {
            query.push(" AND f.status = ").push_bind(status.as_str());
        }
        query.push(" ORDER BY f.id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(file_from_row).collect()
    }
}
