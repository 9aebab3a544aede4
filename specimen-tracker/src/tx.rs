//! Write transactions
//!
//! Every mutating store operation runs inside one of these. The wrapper logs
//! how long the connection was waited for and held, so lock contention
//! between request handlers and sweepers shows up in the logs.

use specimen_common::Result;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;

/// Monitored transaction that logs acquisition and release timing
pub struct WriteTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl WriteTransaction {
    /// Connection to run statements on
    pub fn conn(&mut self) -> &mut SqliteConnection {
        self.tx.as_mut().expect("Transaction already consumed")
    }

    /// Commit the transaction and log release timing
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.tx.take().expect("Transaction already consumed");
        tx.commit().await?;
        self.log_release("commit");
        Ok(())
    }

    /// Roll the transaction back and log release timing
    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.tx.take().expect("Transaction already consumed");
        tx.rollback().await?;
        self.log_release("rollback");
        Ok(())
    }

    fn log_release(&self, how: &'static str) {
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms,
                how = how,
                "LONG TRANSACTION - connection held for an extended period"
            );
        } else if held_ms > 1000 {
            tracing::info!(
                caller = self.caller,
                held_ms = held_ms,
                how = how,
                "Transaction held longer than expected (>1s)"
            );
        } else {
            tracing::debug!(
                caller = self.caller,
                held_ms = held_ms,
                how = how,
                "Connection released"
            );
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        // sqlx rolls an unfinished transaction back when it is dropped
        if self.tx.is_some() {
            self.log_release("drop");
        }
    }
}

/// Begin a monitored write transaction
pub async fn begin_write(pool: &SqlitePool, caller: &'static str) -> Result<WriteTransaction> {
    let start = Instant::now();
    tracing::debug!(caller = caller, "Connection acquisition requested");

    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(
            caller = caller,
            wait_ms = wait_ms,
            "SLOW CONNECTION ACQUISITION - pool may be saturated"
        );
    } else {
        tracing::debug!(caller = caller, wait_ms = wait_ms, "Connection acquired");
    }

    Ok(WriteTransaction {
        tx: Some(tx),
        caller,
        acquired_at: Instant::now(),
    })
}

/// Take the database write lock by touching `table` row `id`
///
/// SQLite transactions start deferred; the first write upgrades them. Doing
/// that before any read means a check-then-insert sequence sees no writes
/// from other connections between the check and the insert.
pub async fn lock_row(conn: &mut SqliteConnection, table: &'static str, id: i64) -> Result<()> {
    let sql = format!("UPDATE {} SET id = id WHERE id = ?", table);
    sqlx::query(&sql).bind(id).execute(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use specimen_common::db::init_memory_database;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let pool = init_memory_database().await.unwrap();
        {
            let mut tx = begin_write(&pool, "test").await.unwrap();
            sqlx::query("INSERT INTO method (name) VALUES ('m')")
                .execute(tx.conn())
                .await
                .unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM method")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let pool = init_memory_database().await.unwrap();
        let mut tx = begin_write(&pool, "test").await.unwrap();
        sqlx::query("INSERT INTO method (name) VALUES ('m')")
            .execute(tx.conn())
            .await
            .unwrap();
        lock_row(tx.conn(), "method", 1).await.unwrap();
        tx.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM method")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
