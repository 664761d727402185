//! Pass/fail judgments on query results and TAP service behaviour

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rspval_common::config::TAP_SCHEMA_QUERY;
use rspval_common::{CapabilityIncludes, Config, QueryResult, TapApplication};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::capabilities;
use crate::error::{E2eError, E2eResult};
pub use crate::tap::JobPolling;
use crate::tap::{JobInfo, JobPhase, TapClient};

/// Which expectation a query result broke
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    Status { observed: String },
    Duration { observed: f64, limit: f64 },
    RowCount { observed: usize, expected: usize },
}

/// One broken expectation of one query for one simulated user
#[derive(Debug, Clone, PartialEq)]
pub struct QueryViolation {
    pub user: usize,
    pub query: String,
    pub kind: ViolationKind,
}

impl fmt::Display for QueryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Status { observed } => write!(
                f,
                "Response status is not OK (got {}) for query [{}]",
                observed, self.query
            ),
            ViolationKind::Duration { observed, limit } => write!(
                f,
                "Query execution time ({:.2}s) is more than twice the expected duration ({:.2}s) for query [{}]",
                observed,
                limit / 2.0,
                self.query
            ),
            ViolationKind::RowCount { observed, expected } => write!(
                f,
                "Row count ({}) does not match the expected row count ({}) for query [{}]",
                observed, expected, self.query
            ),
        }
    }
}

fn result_violations(user: usize, result: &QueryResult) -> impl Iterator<Item = QueryViolation> + '_ {
    let status = (!result.is_ok()).then(|| ViolationKind::Status {
        observed: result.status.clone(),
    });
    let duration = (result.execution_duration > result.duration_limit()).then(|| ViolationKind::Duration {
        observed: result.execution_duration,
        limit: result.duration_limit(),
    });
    let rows = (result.row_count != result.expected_row_count).then(|| ViolationKind::RowCount {
        observed: result.row_count,
        expected: result.expected_row_count,
    });

    [status, duration, rows]
        .into_iter()
        .flatten()
        .map(move |kind| QueryViolation {
            user,
            query: result.query.clone(),
            kind,
        })
}

/// Every broken expectation in `results`, per user, per query, in the order
/// status, duration, row count.
pub fn query_violations(results: &[Vec<QueryResult>]) -> Vec<QueryViolation> {
    results
        .iter()
        .enumerate()
        .flat_map(|(user, user_results)| {
            user_results
                .iter()
                .flat_map(move |result| result_violations(user, result))
        })
        .collect()
}

/// Check every result; the first broken expectation fails the check
pub fn validate_query_results(results: &[Vec<QueryResult>]) -> E2eResult<()> {
    for (user, user_results) in results.iter().enumerate() {
        for result in user_results {
            if let Some(violation) = result_violations(user, result).next() {
                return Err(E2eError::AssertionFailed(violation.to_string()));
            }
        }
    }
    Ok(())
}

fn require<T>(value: &Option<T>, what: &str, job: &str) -> E2eResult<()> {
    match value {
        Some(_) => Ok(()),
        None => Err(E2eError::AssertionFailed(format!("Job {} has no {}", job, what))),
    }
}

/// Checks of one TAP application's service endpoints
pub struct TapValidationService<C: TapClient + ?Sized> {
    client: Arc<C>,
    app: TapApplication,
    results_prefix: String,
    polling: JobPolling,
}

impl<C: TapClient + ?Sized> TapValidationService<C> {
    pub fn new(client: Arc<C>, app: TapApplication, config: &Config) -> Self {
        Self {
            client,
            app,
            results_prefix: config.results_prefix(app),
            polling: JobPolling::default(),
        }
    }

    pub fn with_polling(mut self, polling: JobPolling) -> Self {
        self.polling = polling;
        self
    }

    /// Tables and UWS job lifecycle
    pub async fn validate(&self) -> E2eResult<()> {
        self.validate_tables().await?;
        self.validate_uws_endpoint().await?;
        Ok(())
    }

    /// The service publishes at least one table
    pub async fn validate_tables(&self) -> E2eResult<usize> {
        let tables = self.client.tables().await?;
        if tables.is_empty() {
            return Err(E2eError::AssertionFailed(format!("{} publishes no tables", self.app)));
        }
        debug!("{} publishes {} tables", self.app, tables.len());
        Ok(tables.len())
    }

    /// Run a job through the UWS endpoint and check its metadata
    pub async fn validate_uws_endpoint(&self) -> E2eResult<JobInfo> {
        let job_url = self.client.submit_job(TAP_SCHEMA_QUERY).await?;
        self.client.run_job(&job_url).await?;

        let start = Instant::now();
        let mut phase = self.client.job_phase(&job_url).await?;

        while phase.is_active() {
            if start.elapsed() > self.polling.ceiling {
                if let Err(e) = self.client.delete_job(&job_url).await {
                    warn!("Failed to delete job {}: {}", job_url, e);
                }
                return Err(E2eError::JobTimeout {
                    job_id: job_url.rsplit('/').next().unwrap_or(&job_url).to_string(),
                    phase: phase.to_string(),
                    waited_secs: start.elapsed().as_secs_f64(),
                });
            }
            sleep(self.polling.interval).await;
            phase = self.client.job_phase(&job_url).await?;
        }

        let info = self.client.job_info(&job_url).await?;
        self.check_job(&job_url, phase, &info)?;

        self.client.delete_job(&job_url).await?;
        info!("{} UWS job {} completed and deleted", self.app, job_url);
        Ok(info)
    }

    fn check_job(&self, job_url: &str, phase: JobPhase, info: &JobInfo) -> E2eResult<()> {
        if phase != JobPhase::Completed {
            return Err(E2eError::AssertionFailed(format!(
                "Job {} finished in phase {}, expected COMPLETED",
                job_url, phase
            )));
        }

        require(&info.destruction, "destruction time", job_url)?;
        require(&info.owner, "owner", job_url)?;
        require(&info.quote, "quote", job_url)?;
        require(&info.execution_duration, "execution duration", job_url)?;
        require(&info.job_id, "job id", job_url)?;

        if info.query.as_deref() != Some(TAP_SCHEMA_QUERY) {
            return Err(E2eError::AssertionFailed(format!(
                "Job {} ran {:?}, expected {:?}",
                job_url, info.query, TAP_SCHEMA_QUERY
            )));
        }

        match info.result_hrefs.first() {
            Some(href) if href.starts_with(&self.results_prefix) => Ok(()),
            Some(href) => Err(E2eError::AssertionFailed(format!(
                "Job result {} does not start with {}",
                href, self.results_prefix
            ))),
            None => Err(E2eError::AssertionFailed(format!("Job {} has no result", job_url))),
        }
    }

    /// Compare the live capabilities document with the rendered one
    pub async fn validate_live_capabilities(&self, base_url: &str, includes: CapabilityIncludes) -> E2eResult<()> {
        let actual = self.client.capabilities().await?;
        Self::validate_capabilities(base_url, self.app, includes, &actual)
    }

    pub fn validate_capabilities(
        base_url: &str,
        app: TapApplication,
        includes: CapabilityIncludes,
        actual: &[u8],
    ) -> E2eResult<()> {
        capabilities::validate_capabilities(base_url, app, includes, actual)
    }
}
