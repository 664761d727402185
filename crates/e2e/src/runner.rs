//! Concurrent query runner
//!
//! Every simulated user runs the full list of queries, in order, on its own
//! task. All users share one client. The runner waits for every user to
//! finish before reporting, so a failing user never leaves siblings running
//! in the background.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use rspval_common::{AggregateResults, QueryMode, QueryResult, QuerySpec};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{E2eError, E2eResult};
use crate::tap::QueryOperation;

/// What every worker of a run shares
pub struct RunContext<C: ?Sized> {
    pub client: Arc<C>,
    pub mode: QueryMode,
}

impl<C: ?Sized> Clone for RunContext<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            mode: self.mode,
        }
    }
}

impl<C: ?Sized> RunContext<C> {
    pub fn new(client: Arc<C>, mode: QueryMode) -> Self {
        Self { client, mode }
    }
}

/// Run `queries` once per simulated user, concurrently.
///
/// The outer vector holds one entry per user in completion order; each inner
/// vector holds that user's results in query order. If any user fails, the
/// remaining users still run to completion and the first error observed in
/// completion order is returned.
pub async fn run_concurrent_test<C, O>(
    operation: Arc<O>,
    queries: Arc<[QuerySpec]>,
    users: NonZeroUsize,
    ctx: RunContext<C>,
) -> E2eResult<AggregateResults>
where
    C: ?Sized + Send + Sync + 'static,
    O: QueryOperation<C> + 'static,
{
    info!(
        "Starting {} {} user(s) with {} quer{} each",
        users,
        ctx.mode,
        queries.len(),
        if queries.len() == 1 { "y" } else { "ies" }
    );

    let mut workers: FuturesUnordered<_> = (0..users.get())
        .map(|user| {
            let handle = spawn_user(
                user,
                Arc::clone(&operation),
                Arc::clone(&queries),
                ctx.clone(),
            );
            async move { (user, handle.await) }
        })
        .collect();

    let mut results = Vec::with_capacity(users.get());
    let mut first_error = None;

    while let Some((user, joined)) = workers.next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(E2eError::Worker {
                user,
                reason: e.to_string(),
            }),
        };

        match outcome {
            Ok(user_results) => {
                debug!("User {} finished {} queries", user, user_results.len());
                results.push(user_results);
            }
            Err(e) => {
                error!("User {} failed: {}", user, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

fn spawn_user<C, O>(
    user: usize,
    operation: Arc<O>,
    queries: Arc<[QuerySpec]>,
    ctx: RunContext<C>,
) -> JoinHandle<E2eResult<Vec<QueryResult>>>
where
    C: ?Sized + Send + Sync + 'static,
    O: QueryOperation<C> + 'static,
{
    tokio::spawn(async move {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries.iter() {
            debug!("User {} running [{}]", user, query.query);
            results.push(operation.execute(&*ctx.client, query, ctx.mode).await?);
        }
        Ok(results)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoClient;

    struct Echo {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl QueryOperation<NoClient> for Echo {
        async fn execute(&self, _: &NoClient, query: &QuerySpec, _: QueryMode) -> E2eResult<QueryResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on {
                return Err(E2eError::Tap("boom".to_string()));
            }
            tokio::task::yield_now().await;
            Ok(QueryResult::from_spec(query, "OK".to_string(), query.expected_row_count, 0.01))
        }
    }

    struct Panics;

    #[async_trait]
    impl QueryOperation<NoClient> for Panics {
        async fn execute(&self, _: &NoClient, _: &QuerySpec, _: QueryMode) -> E2eResult<QueryResult> {
            panic!("worker blew up");
        }
    }

    /// Blocks every call until all users are inside `execute` at once
    struct Rendezvous {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl QueryOperation<NoClient> for Rendezvous {
        async fn execute(&self, _: &NoClient, query: &QuerySpec, _: QueryMode) -> E2eResult<QueryResult> {
            self.barrier.wait().await;
            Ok(QueryResult::from_spec(query, "OK".to_string(), query.expected_row_count, 0.0))
        }
    }

    fn queries(n: usize) -> Arc<[QuerySpec]> {
        (0..n)
            .map(|i| QuerySpec {
                query: format!("SELECT {}", i),
                expected_duration: 1.0,
                expected_row_count: i,
            })
            .collect()
    }

    fn ctx() -> RunContext<NoClient> {
        RunContext::new(Arc::new(NoClient), QueryMode::Sync)
    }

    fn users(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_every_user_runs_every_query_in_order() {
        let op = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });

        let results = run_concurrent_test(op.clone(), queries(3), users(4), ctx()).await.unwrap();

        assert_eq!(results.len(), 4);
        for user in &results {
            let rows: Vec<usize> = user.iter().map(|r| r.row_count).collect();
            assert_eq!(rows, vec![0, 1, 2]);
        }
        assert_eq!(op.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_failure_waits_for_all_users() {
        let op = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_on: Some(0),
        });

        let err = run_concurrent_test(op.clone(), queries(2), users(3), ctx()).await.unwrap_err();

        assert!(matches!(err, E2eError::Tap(_)));
        // The failing user stops after its first query, the others finish
        assert_eq!(op.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_error() {
        let err = run_concurrent_test(Arc::new(Panics), queries(1), users(1), ctx()).await.unwrap_err();
        assert!(matches!(err, E2eError::Worker { user: 0, .. }));
    }

    #[tokio::test]
    async fn test_empty_query_list() {
        let op = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let results = run_concurrent_test(op, queries(0), users(2), ctx()).await.unwrap();
        assert_eq!(results, vec![Vec::<QueryResult>::new(), Vec::new()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_users_run_at_the_same_time() {
        let op = Arc::new(Rendezvous {
            barrier: tokio::sync::Barrier::new(5),
        });

        let results = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_concurrent_test(op, queries(2), users(5), ctx()),
        )
        .await
        .expect("users did not run concurrently")
        .unwrap();

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|user| user.len() == 2));
    }
}
