//! Sample search
//!
//! Each search token matches samples of one project by sample name, by the
//! name of a method applied to them, or by a stage annotation; those three
//! queries run concurrently and their hits are unioned. The answer is the
//! intersection over all tokens. A token that matches nothing at all is
//! ignored rather than emptying the result.

use futures::future::try_join_all;
use specimen_common::db::Sample;
use specimen_common::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::debug;

use crate::store::{Lookup, Store};

pub struct SampleResolver {
    store: Store,
}

impl SampleResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Samples of `project` matching every (non-empty, matching) token
    pub async fn resolve_samples(
        &self,
        project: Lookup<'_>,
        tokens: &[String],
    ) -> Result<Vec<Sample>> {
        let project = self.store.get_project(project).await?;
        let project_id = project.identity.id;

        let tokens: Vec<&str> = tokens
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.store.pool();
        let hits = try_join_all(tokens.iter().map(|token| match_token(pool, project_id, token)))
            .await?;

        let mut matched: Option<BTreeSet<i64>> = None;
        for (token, ids) in tokens.iter().zip(hits) {
            if ids.is_empty() {
                debug!("Search token {:?} matched nothing; ignoring it", token);
                continue;
            }
            matched = Some(match matched {
                Some(acc) => acc.intersection(&ids).copied().collect(),
                None => ids,
            });
        }

        let Some(matched) = matched else {
            return Ok(Vec::new());
        };
        let samples = self.store.samples_of_project(project_id).await?;
        Ok(samples
            .into_iter()
            .filter(|s| matched.contains(&s.identity.id))
            .collect())
    }
}

/// Ids of samples in the project that `token` matches in any way
async fn match_token(pool: &SqlitePool, project_id: i64, token: &str) -> Result<BTreeSet<i64>> {
    let pattern = format!("%{}%", escape_like(token));

    let by_name = sqlx::query_scalar::<_, i64>(
        r"SELECT id FROM sample WHERE project_id = ? AND name LIKE ? ESCAPE '\'",
    )
    .bind(project_id)
    .bind(&pattern)
    .fetch_all(pool);

    let by_method = sqlx::query_scalar::<_, i64>(
        r"SELECT DISTINCT st.sample_id
          FROM stage st
          JOIN method m ON m.id = st.method_id
          JOIN sample s ON s.id = st.sample_id
          WHERE s.project_id = ? AND m.name LIKE ? ESCAPE '\'",
    )
    .bind(project_id)
    .bind(&pattern)
    .fetch_all(pool);

    let by_annotation = sqlx::query_scalar::<_, i64>(
        r"SELECT DISTINCT st.sample_id
          FROM stage st
          JOIN sample s ON s.id = st.sample_id
          WHERE s.project_id = ? AND st.annotation LIKE ? ESCAPE '\'",
    )
    .bind(project_id)
    .bind(&pattern)
    .fetch_all(pool);

    let (by_name, by_method, by_annotation) = tokio::try_join!(by_name, by_method, by_annotation)?;
    Ok(by_name
        .into_iter()
        .chain(by_method)
        .chain(by_annotation)
        .collect())
}

/// Escape LIKE wildcards so tokens match literally
fn escape_like(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
