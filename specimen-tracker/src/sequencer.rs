//! Stage sequencer
//!
//! A sample's stages form an append-only log. Readers get the log together
//! with a continuation token naming its last entry; an append must present
//! the token of the log as it is *now*. A client that appends on a stale view
//! gets [`Error::Conflict`] and nothing is written.

use serde::Serialize;
use specimen_common::db::Stage;
use specimen_common::{time, Error, ResourceKind, Result};
use tracing::{info, warn};

use crate::store::{assign_external_id, stages::stage_by_id, Lookup, Store};
use crate::tx::{begin_write, lock_row};

/// A sample's stage log and the token an append must present
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageListing {
    pub stages: Vec<Stage>,
    pub token: String,
}

/// Parameters of [`Store::append_stage`]
#[derive(Debug, Clone, Copy)]
pub struct NewStage<'a> {
    pub sample: &'a str,
    pub method: &'a str,
    pub annotation: &'a str,
    pub token: &'a str,
    pub alt_id: Option<i64>,
}

impl Store {
    /// Stages of a sample in append order, with the current token
    pub async fn list_stages(&self, sample_external_id: &str) -> Result<StageListing> {
        let sample = self.get_sample(sample_external_id).await?;
        let stages = self.stages_of_sample(sample.identity.id).await?;
        let last = stages.last().map(|s| s.identity.id).unwrap_or(0);
        Ok(StageListing {
            token: self.ids().encode_stage_token(last)?,
            stages,
        })
    }

    /// Append a stage if `token` still names the sample's last stage
    pub async fn append_stage(&self, new: NewStage<'_>) -> Result<Stage> {
        let sample = self.get_sample(new.sample).await?;
        let method = self.get_method(Lookup::External(new.method)).await?;
        let expected_last = self.ids().decode_stage_token(new.token).ok_or_else(|| {
            Error::InvalidInput(format!("\"{}\" is not a stage continuation token", new.token))
        })?;

        let mut tx = begin_write(self.pool(), "sequencer::append_stage").await?;

        // Write lock first, so the tail read below cannot go stale before the insert
        lock_row(tx.conn(), "sample", sample.identity.id).await?;

        let current_last: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM stage WHERE sample_id = ?")
                .bind(sample.identity.id)
                .fetch_one(tx.conn())
                .await?;

        if current_last != expected_last {
            tx.rollback().await?;
            warn!(
                sample = %sample.identity.external_id,
                expected_last = expected_last,
                current_last = current_last,
                "Rejected stage append with stale token"
            );
            return Err(Error::Conflict(format!(
                "the stage token for sample {} is stale; list the stages again",
                sample.identity.external_id
            )));
        }

        let id = sqlx::query(
            "INSERT INTO stage (sample_id, method_id, annotation, alt_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(sample.identity.id)
        .bind(method.identity.id)
        .bind(new.annotation)
        .bind(new.alt_id)
        .bind(time::to_db(&time::now()))
        .execute(tx.conn())
        .await?
        .last_insert_rowid();
        assign_external_id(tx.conn(), self.ids(), ResourceKind::Stage, id).await?;
        let stage = stage_by_id(tx.conn(), id).await?;
        tx.commit().await?;

        info!(
            "Appended stage {} ({}) to sample {} at position {}",
            stage.identity.external_id, method.name, sample.identity.external_id, stage.position
        );
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::memory_store;

    async fn seeded() -> Store {
        let store = memory_store().await;
        store.add_project("Manhattan", "man-###").await.unwrap();
        store.add_sample(Lookup::Name("Manhattan"), "man-001").await.unwrap();
        store.add_method("XRF", "").await.unwrap();
        store
    }

    fn append<'a>(token: &'a str) -> NewStage<'a> {
        NewStage {
            sample: "OQn6Q",
            method: "XZOQ0",
            annotation: "",
            token,
            alt_id: None,
        }
    }

    #[tokio::test]
    async fn test_empty_sample_has_zero_token() {
        let store = seeded().await;
        let listing = store.list_stages("OQn6Q").await.unwrap();
        assert!(listing.stages.is_empty());
        assert_eq!(listing.token, "e2MNy");
    }

    #[tokio::test]
    async fn test_append_chain() {
        let store = seeded().await;
        let mut token = store.list_stages("OQn6Q").await.unwrap().token;
        for expected_position in 1..=4 {
            let stage = store.append_stage(append(&token)).await.unwrap();
            assert_eq!(stage.position, expected_position);
            token = store.list_stages("OQn6Q").await.unwrap().token;
            assert_eq!(token, store.ids().encode_stage_token(stage.identity.id).unwrap());
        }

        let listing = store.list_stages("OQn6Q").await.unwrap();
        let positions: Vec<i64> = listing.stages.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
        assert_eq!(listing.stages[0].identity.external_id, "Drn1Q");
    }

    #[tokio::test]
    async fn test_stale_token_is_conflict_and_writes_nothing() {
        let store = seeded().await;
        let first = store.append_stage(append("e2MNy")).await.unwrap();

        let err = store.append_stage(append("e2MNy")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

        let listing = store.list_stages("OQn6Q").await.unwrap();
        assert_eq!(listing.stages, vec![first]);
    }

    #[tokio::test]
    async fn test_malformed_token_is_invalid_input() {
        let store = seeded().await;
        let err = store.append_stage(append("not a token")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        // a stage id is not a token either
        let err = store.append_stage(append("Drn1Q")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_parents() {
        let store = seeded().await;
        let mut new = append("e2MNy");
        new.method = "PqrX9";
        assert!(matches!(
            store.append_stage(new).await.unwrap_err(),
            Error::NotFound { kind: "method", .. }
        ));
        assert!(matches!(
            store.list_stages("XZOQ0").await.unwrap_err(),
            Error::NotFound { kind: "sample", .. }
        ));
    }

    #[tokio::test]
    async fn test_logs_of_different_samples_are_independent() {
        let store = seeded().await;
        let other = store.add_sample(Lookup::Name("Manhattan"), "man-002").await.unwrap();

        store.append_stage(append("e2MNy")).await.unwrap();
        let mut new = append("e2MNy");
        new.sample = &other.identity.external_id;
        new.annotation = "first scan";
        new.alt_id = Some(17);
        let stage = store.append_stage(new).await.unwrap();
        assert_eq!(stage.position, 1);
        assert_eq!(stage.alt_id, Some(17));
        assert_eq!(stage.annotation, "first scan");

        let fetched = store
            .get_sample_stage(&other.identity.external_id, &stage.identity.external_id)
            .await
            .unwrap();
        assert_eq!(fetched, stage);
        assert!(store
            .get_sample_stage("OQn6Q", &stage.identity.external_id)
            .await
            .is_err());
    }
}
