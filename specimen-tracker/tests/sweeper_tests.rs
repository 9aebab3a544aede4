//! File lifecycle driven by the sweepers, on a real store directory

use specimen_common::config::TrackerConfig;
use specimen_common::db::{FileStatus, StageFile};
use async_trait::async_trait;
use specimen_common::Result;
use specimen_tracker::{FileLifecycle, Lookup, NewStage, SweepReport, Sweeper, Tracker};
use std::fs;
use tempfile::TempDir;

/// Tracker with one project, sample, method and stage; returns the stage id
async fn tracker_with_stage(dir: &TempDir) -> (Tracker, String) {
    let tracker = Tracker::open(TrackerConfig::from_root(dir.path()))
        .await
        .unwrap();
    let store = tracker.store();
    store.add_project("Manhattan", "man-###").await.unwrap();
    let sample = store
        .add_sample(Lookup::Name("Manhattan"), "sample 1")
        .await
        .unwrap();
    let method = store.add_method("X-ray tomography", "").await.unwrap();
    let token = tracker
        .list_stages(&sample.identity.external_id)
        .await
        .unwrap()
        .token;
    let stage = tracker
        .append_stage(NewStage {
            sample: &sample.identity.external_id,
            method: &method.identity.external_id,
            annotation: "Annotation 0",
            token: &token,
            alt_id: None,
        })
        .await
        .unwrap();
    (tracker, stage.identity.external_id)
}

/// Write an upload into the upload area and register it as staged
async fn upload(tracker: &Tracker, stage: &str, relative: &str, bytes: &[u8]) -> StageFile {
    let source = tracker.config().upload_path.join(relative);
    fs::create_dir_all(source.parent().unwrap()).unwrap();
    fs::write(&source, bytes).unwrap();
    tracker
        .allocate_and_register_file(stage, relative)
        .await
        .unwrap()
}

async fn status_of(tracker: &Tracker, file: &StageFile) -> FileStatus {
    tracker
        .store()
        .get_file(&file.identity.external_id)
        .await
        .unwrap()
        .status
}

#[tokio::test]
async fn test_file_moves_from_upload_to_store() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;
    let file = upload(&tracker, &stage, "upload-1/scan.tiff", b"pixels").await;
    let source = tracker.files().source_path(&file);
    let target = tracker.files().target_path(&file);
    assert!(!target.exists());

    let report = tracker.sweep("staged").await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            selected: 1,
            advanced: 1,
            skipped: 0,
            failed: 0
        }
    );
    assert_eq!(fs::read(&target).unwrap(), b"pixels");
    assert!(source.exists(), "archiving copies, it does not move");
    assert_eq!(status_of(&tracker, &file).await, FileStatus::Archived);

    let report = tracker.sweep("archived").await.unwrap();
    assert_eq!(report.advanced, 1);
    assert!(!source.parent().unwrap().exists());
    assert!(tracker.config().upload_path.exists());
    assert!(target.exists());
    assert_eq!(status_of(&tracker, &file).await, FileStatus::Cleaned);
}

#[tokio::test]
async fn test_sweeps_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;
    let file = upload(&tracker, &stage, "upload-1/scan.tiff", b"pixels").await;

    tracker.sweep("staged").await.unwrap();
    // archived files are not selected again
    let report = tracker.sweep("StagedFileSweeper").await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(status_of(&tracker, &file).await, FileStatus::Archived);

    tracker.sweep("archived").await.unwrap();
    let report = tracker.sweep("archived").await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(status_of(&tracker, &file).await, FileStatus::Cleaned);
}

#[tokio::test]
async fn test_missing_upload_directory_still_cleans() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;
    let file = upload(&tracker, &stage, "upload-1/scan.tiff", b"pixels").await;

    tracker.sweep("staged").await.unwrap();
    // an earlier cleanup pass removed it but died before the status update
    fs::remove_dir_all(tracker.files().source_path(&file).parent().unwrap()).unwrap();

    let report = tracker.sweep("archived").await.unwrap();
    assert_eq!(report.advanced, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(status_of(&tracker, &file).await, FileStatus::Cleaned);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;

    let first = upload(&tracker, &stage, "upload-1/a.txt", b"a").await;
    // registered, but the bytes never arrived
    let lost = tracker
        .allocate_and_register_file(&stage, "upload-2/b.txt")
        .await
        .unwrap();
    let last = upload(&tracker, &stage, "upload-3/c.txt", b"c").await;

    let report = tracker.sweep("staged").await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            selected: 3,
            advanced: 2,
            skipped: 0,
            failed: 1
        }
    );
    assert_eq!(status_of(&tracker, &first).await, FileStatus::Archived);
    assert_eq!(status_of(&tracker, &lost).await, FileStatus::Staged);
    assert_eq!(status_of(&tracker, &last).await, FileStatus::Archived);

    // once the bytes show up the next pass picks the file up
    let source = tracker.files().source_path(&lost);
    fs::create_dir_all(source.parent().unwrap()).unwrap();
    fs::write(&source, b"b").unwrap();
    let report = tracker.sweep("staged").await.unwrap();
    assert_eq!(report.advanced, 1);
    assert_eq!(status_of(&tracker, &lost).await, FileStatus::Archived);
}

#[tokio::test]
async fn test_cleanup_never_removes_the_upload_root() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;
    let loose = upload(&tracker, &stage, "loose.txt", b"x").await;
    let sibling = upload(&tracker, &stage, "upload-1/kept.txt", b"y").await;

    tracker.sweep("staged").await.unwrap();
    let report = tracker.sweep("archived").await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.advanced, 1);

    assert!(tracker.config().upload_path.exists());
    assert!(tracker.files().source_path(&loose).exists());
    assert_eq!(status_of(&tracker, &loose).await, FileStatus::Archived);
    assert_eq!(status_of(&tracker, &sibling).await, FileStatus::Cleaned);
}

#[tokio::test]
async fn test_cleanup_keeps_unarchived_siblings() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;
    let first = upload(&tracker, &stage, "u1/a.txt", b"a").await;
    tracker.sweep("staged").await.unwrap();

    // a second upload lands in the same directory before the cleanup pass
    let second_source = tracker.config().upload_path.join("u1/b.txt");
    fs::write(&second_source, b"b").unwrap();
    let second = tracker
        .files()
        .register_file(&stage, "u1/b.txt", FileStatus::Prepared)
        .await
        .unwrap();

    let report = tracker.sweep("archived").await.unwrap();
    assert_eq!(report.advanced, 1);
    assert_eq!(status_of(&tracker, &first).await, FileStatus::Cleaned);
    assert!(!tracker.files().source_path(&first).exists());
    assert_eq!(fs::read(&second_source).unwrap(), b"b");
    assert_eq!(status_of(&tracker, &second).await, FileStatus::Prepared);

    // once the sibling is archived too, its cleanup takes the directory
    assert!(tracker.files().mark_staged(&second).await.unwrap());
    tracker.sweep("staged").await.unwrap();
    assert_eq!(
        fs::read(tracker.files().target_path(&second)).unwrap(),
        b"b"
    );
    let report = tracker.sweep("archived").await.unwrap();
    assert_eq!(report.advanced, 1);
    assert!(!second_source.parent().unwrap().exists());
    assert!(tracker.config().upload_path.exists());
    assert_eq!(status_of(&tracker, &second).await, FileStatus::Cleaned);
}

/// Archives every file it is handed just before the real sweeper does
struct RacingSweeper {
    inner: Box<dyn Sweeper>,
}

#[async_trait]
impl Sweeper for RacingSweeper {
    fn name(&self) -> &'static str {
        "RacingSweeper"
    }

    fn source_status(&self) -> FileStatus {
        self.inner.source_status()
    }

    fn lifecycle(&self) -> &FileLifecycle {
        self.inner.lifecycle()
    }

    async fn process(&self, file: &StageFile) -> Result<bool> {
        self.lifecycle().mark_archived(file).await?;
        self.inner.process(file).await
    }
}

#[tokio::test]
async fn test_file_moved_by_another_writer_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;
    let file = upload(&tracker, &stage, "upload-1/scan.tiff", b"pixels").await;

    let sweeper = RacingSweeper {
        inner: tracker.sweeper("staged").unwrap(),
    };
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            selected: 1,
            advanced: 0,
            skipped: 1,
            failed: 0
        }
    );
    assert_eq!(status_of(&tracker, &file).await, FileStatus::Archived);

    // a stale record handed straight to the sweeper is skipped the same way
    let stale = file;
    let result = tracker.sweeper("staged").unwrap().process(&stale).await;
    assert!(matches!(result, Ok(false)), "{:?}", result);
    assert_eq!(status_of(&tracker, &stale).await, FileStatus::Archived);
}

#[tokio::test]
async fn test_same_name_uploads_get_increasing_versions() {
    let dir = TempDir::new().unwrap();
    let (tracker, stage) = tracker_with_stage(&dir).await;

    let first = upload(&tracker, &stage, "upload-1/file.txt", b"one").await;
    tracker.sweep("staged").await.unwrap();
    let second = upload(&tracker, &stage, "upload-2/file.txt", b"two").await;
    let third = upload(&tracker, &stage, "upload-3/file.txt", b"three").await;

    assert!(first.relative_target_path.ends_with("/file-00000.txt"));
    assert!(second.relative_target_path.ends_with("/file-00001.txt"));
    assert!(third.relative_target_path.ends_with("/file-00002.txt"));

    tracker.sweep("staged").await.unwrap();
    for (file, bytes) in [
        (&first, &b"one"[..]),
        (&second, &b"two"[..]),
        (&third, &b"three"[..]),
    ] {
        assert_eq!(fs::read(tracker.files().target_path(file)).unwrap(), bytes);
    }
}

#[tokio::test]
async fn test_unknown_sweeper_is_an_error() {
    let dir = TempDir::new().unwrap();
    let (tracker, _) = tracker_with_stage(&dir).await;
    let err = tracker.sweep("prepared").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}
