//! Tracker facade
//!
//! Opens the database for a configuration and hands out the store, the file
//! lifecycle, the sweepers and the search resolver. This is the surface a
//! request layer calls into.

use specimen_common::config::TrackerConfig;
use specimen_common::db::{init_database, Method, Project, Sample, Stage, StageFile};
use specimen_common::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::lifecycle::FileLifecycle;
use crate::resolver::SampleResolver;
use crate::sequencer::{NewStage, StageListing};
use crate::store::{Lookup, Store};
use crate::sweepers::{make_sweeper, SweepReport, Sweeper};

#[derive(Debug, Clone)]
pub struct Tracker {
    config: TrackerConfig,
    files: FileLifecycle,
}

impl Tracker {
    /// Create the directories and open (or create) the database
    pub async fn open(config: TrackerConfig) -> Result<Self> {
        config.ensure_directories()?;
        let pool = init_database(&config.database_path).await?;
        info!(
            root = %config.root_folder.display(),
            store = %config.store_path.display(),
            uploads = %config.upload_path.display(),
            "Tracker ready"
        );
        Ok(Self::with_pool(config, pool))
    }

    /// Tracker over an already initialized pool
    pub fn with_pool(config: TrackerConfig, pool: SqlitePool) -> Self {
        let store = Store::new(pool, config.obfuscator());
        let files = FileLifecycle::new(store, &config.store_path, &config.upload_path);
        Self { config, files }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        self.files.store()
    }

    pub fn files(&self) -> &FileLifecycle {
        &self.files
    }

    pub fn resolver(&self) -> SampleResolver {
        SampleResolver::new(self.store().clone())
    }

    pub fn sweeper(&self, name: &str) -> Result<Box<dyn Sweeper>> {
        make_sweeper(name, self.files.clone())
    }

    pub async fn get_project(&self, lookup: Lookup<'_>) -> Result<Project> {
        self.store().get_project(lookup).await
    }

    pub async fn get_sample(&self, project: Lookup<'_>, sample: Lookup<'_>) -> Result<Sample> {
        self.store().get_project_sample(project, sample).await
    }

    pub async fn get_method(&self, lookup: Lookup<'_>) -> Result<Method> {
        self.store().get_method(lookup).await
    }

    pub async fn list_stages(&self, sample_external_id: &str) -> Result<StageListing> {
        self.store().list_stages(sample_external_id).await
    }

    pub async fn append_stage(&self, new: NewStage<'_>) -> Result<Stage> {
        self.store().append_stage(new).await
    }

    pub async fn allocate_and_register_file(
        &self,
        stage_external_id: &str,
        uploaded_path: &str,
    ) -> Result<StageFile> {
        self.files
            .allocate_and_register_file(stage_external_id, uploaded_path)
            .await
    }

    /// Run the sweeper registered under `name` once
    pub async fn sweep(&self, name: &str) -> Result<SweepReport> {
        self.sweeper(name)?.sweep().await
    }
}
