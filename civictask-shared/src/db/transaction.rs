/// Transaction coordinator
///
/// Runs a unit of work against one transaction. The unit receives
/// `&mut PgConnection` and must route every statement through it.
///
/// - [`run_in_transaction`] commits on success and rolls back on error.
/// - [`run_isolated`] always rolls back, which is what tests and dry runs want.
///
/// A rollback that fails after the unit of work failed is reported instead of
/// the unit's own error, since the connection state is then unknown.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::db::transaction::run_in_transaction;
/// # async fn example(pool: sqlx::PgPool) -> civictask_shared::error::CoreResult<()> {
/// let renamed: u64 = run_in_transaction(&pool, |conn| {
///     Box::pin(async move {
///         let result = sqlx::query("UPDATE categories SET name = 'Garden' WHERE name = 'Gardening'")
///             .execute(conn)
///             .await?;
///         Ok(result.rows_affected())
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{CoreError, CoreResult, TransactionStage};

async fn begin(pool: &PgPool) -> CoreResult<Transaction<'static, Postgres>> {
    pool.begin().await.map_err(|source| CoreError::Transaction {
        stage: TransactionStage::Begin,
        source,
    })
}

async fn rollback(tx: Transaction<'static, Postgres>) -> CoreResult<()> {
    tx.rollback().await.map_err(|source| {
        error!(error = %source, "Transaction rollback failed");
        CoreError::Transaction {
            stage: TransactionStage::Rollback,
            source,
        }
    })
}

/// Runs `f` in a transaction, committing only when it succeeds
pub async fn run_in_transaction<T, F>(pool: &PgPool, f: F) -> CoreResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, CoreResult<T>> + Send,
{
    let mut tx = begin(pool).await?;
    let outcome = f(&mut *tx).await;

    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(|source| {
                error!(error = %source, "Transaction commit failed");
                CoreError::Transaction {
                    stage: TransactionStage::Commit,
                    source,
                }
            })?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            warn!(error = %err, "Unit of work failed, rolling back");
            rollback(tx).await?;
            Err(err)
        }
    }
}

/// Runs `f` in a transaction that is always rolled back
pub async fn run_isolated<T, F>(pool: &PgPool, f: F) -> CoreResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, CoreResult<T>> + Send,
{
    let mut tx = begin(pool).await?;
    let result = f(&mut *tx).await;
    rollback(tx).await?;
    debug!(ok = result.is_ok(), "Isolated transaction rolled back");
    result
}

/// Races `work` against `token`; returns `Cancelled` once the token fires
///
/// The losing future is dropped, which aborts its query and rolls back any
/// transaction it held.
pub async fn cancellable<T, Fut>(token: &CancellationToken, work: Fut) -> CoreResult<T>
where
    Fut: Future<Output = CoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            warn!("Unit of work cancelled");
            Err(CoreError::Cancelled)
        }
        result = work => result,
    }
}

/// Fails with `Cancelled` when `work` outlives `deadline`
pub async fn with_deadline<T, Fut>(deadline: Duration, work: Fut) -> CoreResult<T>
where
    Fut: Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(deadline_ms = deadline.as_millis() as u64, "Unit of work exceeded deadline");
            Err(CoreError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let token = CancellationToken::new();
        let result = cancellable(&token, async { Ok::<_, CoreError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancellable_returns_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let result: CoreResult<()> = cancellable(&token, futures::future::pending()).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_keeps_work_error() {
        let token = CancellationToken::new();
        let result: CoreResult<()> =
            cancellable(&token, async { Err(CoreError::NotFound("task".into())) }).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let result: CoreResult<()> = with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_completes_in_time() {
        let result = with_deadline(Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, CoreError>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }
}
