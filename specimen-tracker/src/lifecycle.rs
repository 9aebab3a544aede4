//! File lifecycle
//!
//! An uploaded file moves `prepared → staged → archived → cleaned`. This
//! module records files against their stage, reserves their permanent path,
//! confirms uploads by checksum and performs the guarded status moves the
//! sweepers rely on.
//!
//! Status updates are compare-and-set: a move only happens if the row is
//! still in the expected status, so a sweeper racing another sweeper (or a
//! second run of itself) moves each file at most once.

use specimen_common::db::{FileStatus, StageFile};
use specimen_common::{time, Error, ResourceKind, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::allocator;
use crate::checksum::{validate_checksum, ChecksumMethod};
use crate::store::{assign_external_id, files::file_by_id, Store};
use crate::tx::{begin_write, lock_row};

/// Uploaded files and where they live on disk
#[derive(Debug, Clone)]
pub struct FileLifecycle {
    store: Store,
    store_root: PathBuf,
    upload_root: PathBuf,
}

impl FileLifecycle {
    pub fn new(store: Store, store_root: impl Into<PathBuf>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            store_root: store_root.into(),
            upload_root: upload_root.into(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Where the uploaded bytes wait
    pub fn source_path(&self, file: &StageFile) -> PathBuf {
        self.upload_root.join(&file.relative_source_path)
    }

    /// Permanent home of the file
    pub fn target_path(&self, file: &StageFile) -> PathBuf {
        self.store_root.join(&file.relative_target_path)
    }

    /// Record an upload against a stage and reserve its permanent path
    ///
    /// `uploaded_path` is relative to the upload area. New files start as
    /// `prepared` (bytes still to be confirmed) or `staged` (already
    /// complete).
    pub async fn register_file(
        &self,
        stage_external_id: &str,
        uploaded_path: &str,
        initial: FileStatus,
    ) -> Result<StageFile> {
        if !matches!(initial, FileStatus::Prepared | FileStatus::Staged) {
            return Err(Error::InvalidInput(format!(
                "a new file cannot start as {}",
                initial
            )));
        }
        let source = normalize_upload_path(uploaded_path)?;

        let stage = self.store.get_stage(stage_external_id).await?;
        let sample = self.store.get_sample(&stage.sample_external_id).await?;
        let segments = [
            format!("project-{}", sample.project_external_id),
            format!("sample-{}", sample.identity.external_id),
            format!("stage-{}", stage.identity.external_id),
            format!("method-{}", stage.method_external_id),
        ];

        let mut tx = begin_write(self.store.pool(), "lifecycle::register_file").await?;
        // Serialize registrations so two of them cannot reserve the same target
        lock_row(tx.conn(), "stage", stage.identity.id).await?;

        let reserved: HashSet<String> =
            sqlx::query_scalar("SELECT relative_target_path FROM stage_file WHERE stage_id = ?")
                .bind(stage.identity.id)
                .fetch_all(tx.conn())
                .await?
                .into_iter()
                .collect();
        let placement =
            allocator::allocate_avoiding(&self.store_root, &segments, &source, &reserved)?;

        let now = time::to_db(&time::now());
        let id = sqlx::query(
            "INSERT INTO stage_file
                 (stage_id, relative_source_path, relative_target_path, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(stage.identity.id)
        .bind(&source)
        .bind(&placement.relative_path)
        .bind(initial.as_str())
        .bind(&now)
        .bind(&now)
        .execute(tx.conn())
        .await
        .map_err(|e| Error::from_insert(e, || format!("upload {} is already registered", source)))?
        .last_insert_rowid();
        assign_external_id(tx.conn(), self.store.ids(), ResourceKind::StageFile, id).await?;
        let file = file_by_id(tx.conn(), id).await?;
        tx.commit().await?;

        info!(
            file = %file.identity.external_id,
            stage = %stage.identity.external_id,
            source = %file.relative_source_path,
            target = %file.relative_target_path,
            status = %file.status,
            "Registered file"
        );
        Ok(file)
    }

    /// Register an upload whose bytes are already complete
    pub async fn allocate_and_register_file(
        &self,
        stage_external_id: &str,
        uploaded_path: &str,
    ) -> Result<StageFile> {
        self.register_file(stage_external_id, uploaded_path, FileStatus::Staged)
            .await
    }

    /// Check a prepared upload against the client's checksum and stage it
    ///
    /// Files already past `prepared` are returned as they are, so a client
    /// retrying a confirmation that went through gets the same answer.
    pub async fn confirm_upload(
        &self,
        file_external_id: &str,
        method: &str,
        checksum: &str,
    ) -> Result<StageFile> {
        let method: ChecksumMethod = method.parse()?;
        let file = self.store.get_file(file_external_id).await?;
        if file.status != FileStatus::Prepared {
            debug!(
                file = %file.identity.external_id,
                status = %file.status,
                "Upload already confirmed"
            );
            return Ok(file);
        }

        let path = self.source_path(&file);
        let received = checksum.to_string();
        tokio::task::spawn_blocking(move || validate_checksum(&path, method, &received))
            .await
            .map_err(|e| Error::Internal(format!("checksum task failed: {}", e)))??;

        self.mark_staged(&file).await?;
        self.store.get_file(file_external_id).await
    }

    pub async fn mark_staged(&self, file: &StageFile) -> Result<bool> {
        self.transition(file, FileStatus::Prepared, FileStatus::Staged)
            .await
    }

    pub async fn mark_archived(&self, file: &StageFile) -> Result<bool> {
        self.transition(file, FileStatus::Staged, FileStatus::Archived)
            .await
    }

    pub async fn mark_cleaned(&self, file: &StageFile) -> Result<bool> {
        self.transition(file, FileStatus::Archived, FileStatus::Cleaned)
            .await
    }

    /// Move `file` from `from` to `to` if it is still in `from`
    ///
    /// Returns false when another writer got there first.
    async fn transition(&self, file: &StageFile, from: FileStatus, to: FileStatus) -> Result<bool> {
        if !from.can_advance_to(to) {
            return Err(Error::InvalidInput(format!(
                "a file cannot move from {} to {}",
                from, to
            )));
        }

        let mut tx = begin_write(self.store.pool(), "lifecycle::transition").await?;
        let updated = sqlx::query(
            "UPDATE stage_file SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(time::to_db(&time::now()))
        .bind(file.identity.id)
        .bind(from.as_str())
        .execute(tx.conn())
        .await?
        .rows_affected();
        tx.commit().await?;

        let moved = updated == 1;

        if moved {
            debug!(file = %file.identity.external_id, "File status {} -> {}", from, to);
        } else {
            debug!(
                file = %file.identity.external_id,
                "File no longer {}; leaving it alone", from
            );
        }
        Ok(moved)
    }
}

/// Validate an upload path and bring it to `/`-separated form
///
/// The path must stay inside the upload area: relative, with no `..`.
pub fn normalize_upload_path(uploaded_path: &str) -> Result<String> {
    let invalid = || {
        Error::InvalidInput(format!(
            "\"{}\" is not a relative path inside the upload area",
            uploaded_path
        ))
    };

    let mut parts = Vec::new();
    for component in Path::new(uploaded_path.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(invalid)?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid())
            }
        }
    }

    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}
