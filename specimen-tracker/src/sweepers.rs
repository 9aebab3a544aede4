//! Background sweepers
//!
//! Each sweeper selects every file in one status and tries to move it one
//! step forward. A failure on one file is logged and counted, and the sweep
//! goes on with the next file. Running a sweeper twice is harmless: files
//! that already moved are no longer selected, and the status update is
//! compare-and-set.

use async_trait::async_trait;
use serde::Serialize;
use specimen_common::db::{FileStatus, StageFile};
use specimen_common::{Error, Result};
use tracing::{error, info, warn};

use crate::lifecycle::FileLifecycle;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Files found in the sweeper's status
    pub selected: usize,
    /// Files moved to the next status
    pub advanced: usize,
    /// Files another writer moved first
    pub skipped: usize,
    pub failed: usize,
}

#[async_trait]
pub trait Sweeper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Status this sweeper picks files up from
    fn source_status(&self) -> FileStatus;

    fn lifecycle(&self) -> &FileLifecycle;

    /// Do this sweeper's work on one file and advance it
    ///
    /// Returns false when the status update found the file already moved.
    async fn process(&self, file: &StageFile) -> Result<bool>;

    /// Process every file currently in [`Sweeper::source_status`]
    async fn sweep(&self) -> Result<SweepReport> {
        let files = self
            .lifecycle()
            .store()
            .files_in_state(self.source_status())
            .await
            .map_err(|e| {
                error!("Unhandled error in sweeper {}: {}", self.name(), e);
                e
            })?;

        info!(
            "{}: found {} {} file(s)",
            self.name(),
            files.len(),
            self.source_status()
        );

        let mut report = SweepReport {
            selected: files.len(),
            ..SweepReport::default()
        };
        for file in &files {
            match self.process(file).await {
                Ok(true) => report.advanced += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        sweeper = self.name(),
                        file = %file.identity.external_id,
                        source = %file.relative_source_path,
                        error = %e,
                        "Failed to process file"
                    );
                }
            }
        }

        info!(
            sweeper = self.name(),
            selected = report.selected,
            advanced = report.advanced,
            skipped = report.skipped,
            failed = report.failed,
            "Sweep finished"
        );
        Ok(report)
    }
}

/// Copies staged uploads into the permanent store and marks them archived
pub struct StagedFileSweeper {
    files: FileLifecycle,
}

impl StagedFileSweeper {
    pub fn new(files: FileLifecycle) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Sweeper for StagedFileSweeper {
    fn name(&self) -> &'static str {
        "StagedFileSweeper"
    }

    fn source_status(&self) -> FileStatus {
        FileStatus::Staged
    }

    fn lifecycle(&self) -> &FileLifecycle {
        &self.files
    }

    async fn process(&self, file: &StageFile) -> Result<bool> {
        let source = self.files.source_path(file);
        let target = self.files.target_path(file);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // The target path belongs to this file alone; a partial copy from an
        // interrupted run is overwritten.
        tokio::fs::copy(&source, &target).await?;
        info!("Copied file: {} -> {}", source.display(), target.display());

        self.files.mark_archived(file).await
    }
}

/// Removes the upload directories of archived files and marks them cleaned
pub struct ArchivedFileSweeper {
    files: FileLifecycle,
}

impl ArchivedFileSweeper {
    pub fn new(files: FileLifecycle) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Sweeper for ArchivedFileSweeper {
    fn name(&self) -> &'static str {
        "ArchivedFileSweeper"
    }

    fn source_status(&self) -> FileStatus {
        FileStatus::Archived
    }

    fn lifecycle(&self) -> &FileLifecycle {
        &self.files
    }

    async fn process(&self, file: &StageFile) -> Result<bool> {
        let Some((dir, _)) = file.relative_source_path.rsplit_once('/') else {
            return Err(Error::InvalidInput(format!(
                "upload {} sits directly in the upload area; refusing to remove it",
                file.relative_source_path
            )));
        };
        let upload_dir = self.files.upload_root().join(dir);

        // Siblings still waiting to be archived keep the directory alive
        let pending = self.files.store().unarchived_uploads_under(dir).await?;
        if pending > 0 {
            let source = self.files.source_path(file);
            match tokio::fs::remove_file(&source).await {
                Ok(()) => info!("Removed upload: {}", source.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Upload doesn't exist: {}", source.display())
                }
                Err(e) => return Err(e.into()),
            }
            info!(
                "Kept upload directory {}: {} upload(s) not archived yet",
                upload_dir.display(),
                pending
            );
            return self.files.mark_cleaned(file).await;
        }

        if tokio::fs::try_exists(&upload_dir).await? {
            tokio::fs::remove_dir_all(&upload_dir).await?;
            info!("Removed upload directory: {}", upload_dir.display());
        } else {
            warn!("Upload directory doesn't exist: {}", upload_dir.display());
        }

        self.files.mark_cleaned(file).await
    }
}

/// Names a sweeper can be invoked by
pub const SWEEPER_NAMES: [&str; 2] = ["staged", "archived"];

/// Sweeper registered under `name`
pub fn make_sweeper(name: &str, files: FileLifecycle) -> Result<Box<dyn Sweeper>> {
    match name {
        "staged" | "StagedFileSweeper" => Ok(Box::new(StagedFileSweeper::new(files))),
        "archived" | "ArchivedFileSweeper" => Ok(Box::new(ArchivedFileSweeper::new(files))),
        other => Err(Error::InvalidInput(format!(
            "unknown sweeper \"{}\"; expected one of: {}",
            other,
            SWEEPER_NAMES.join(", ")
        ))),
    }
}
