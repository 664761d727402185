//! TAP client abstraction and the query execution service

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rspval_common::timer::timed;
use rspval_common::{QueryMode, QueryResult, QuerySpec};
use tracing::debug;

use crate::error::E2eResult;

pub mod http;
pub mod votable;

pub use http::HttpTapClient;

/// What a query returned, reduced to what the validator checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapResultSet {
    pub status: String,
    pub row_count: usize,
}

/// Phase of a UWS job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Held,
    Suspended,
    Archived,
    #[default]
    Unknown,
}

impl JobPhase {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => JobPhase::Pending,
            "QUEUED" => JobPhase::Queued,
            "EXECUTING" => JobPhase::Executing,
            "COMPLETED" => JobPhase::Completed,
            "ERROR" => JobPhase::Error,
            "ABORTED" => JobPhase::Aborted,
            "HELD" => JobPhase::Held,
            "SUSPENDED" => JobPhase::Suspended,
            "ARCHIVED" => JobPhase::Archived,
            _ => JobPhase::Unknown,
        }
    }

    /// The job has not reached a terminal phase yet
    pub fn is_active(&self) -> bool {
        matches!(self, JobPhase::Pending | JobPhase::Queued | JobPhase::Executing)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Pending => "PENDING",
            JobPhase::Queued => "QUEUED",
            JobPhase::Executing => "EXECUTING",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Error => "ERROR",
            JobPhase::Aborted => "ABORTED",
            JobPhase::Held => "HELD",
            JobPhase::Suspended => "SUSPENDED",
            JobPhase::Archived => "ARCHIVED",
            JobPhase::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// How a UWS job is waited on
#[derive(Debug, Clone, Copy)]
pub struct JobPolling {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for JobPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
        }
    }
}

/// Metadata of a UWS job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInfo {
    pub job_id: Option<String>,
    pub owner: Option<String>,
    pub phase: JobPhase,
    pub quote: Option<String>,
    pub execution_duration: Option<u64>,
    pub destruction: Option<String>,
    pub query: Option<String>,
    pub result_hrefs: Vec<String>,
}

/// An authenticated handle to one TAP service.
///
/// A single client is shared by every simulated user of a scenario, and the
/// runner adds no locking around it. Implementations must therefore be safe
/// to call from many tasks at once; the `Send + Sync` bound is the
/// compile-time half of that contract, the other half is that concurrent
/// calls must not interfere with each other's requests or results.
#[async_trait]
pub trait TapClient: Send + Sync {
    /// Root URL of the TAP service
    fn service_url(&self) -> &str;

    async fn run_sync(&self, query: &str) -> E2eResult<TapResultSet>;

    /// Submit `query` as a UWS job, wait for it to finish and fetch its result
    async fn run_async(&self, query: &str) -> E2eResult<TapResultSet>;

    /// Names of the tables published by the service
    async fn tables(&self) -> E2eResult<Vec<String>>;

    /// Raw body of the VOSI capabilities endpoint
    async fn capabilities(&self) -> E2eResult<Vec<u8>>;

    /// Create a job for `query` in the PENDING phase, returning its URL
    async fn submit_job(&self, query: &str) -> E2eResult<String>;

    async fn run_job(&self, job_url: &str) -> E2eResult<()>;

    async fn job_phase(&self, job_url: &str) -> E2eResult<JobPhase>;

    async fn job_info(&self, job_url: &str) -> E2eResult<JobInfo>;

    async fn delete_job(&self, job_url: &str) -> E2eResult<()>;
}

/// An operation the concurrent runner applies to every query of every user
#[async_trait]
pub trait QueryOperation<C: ?Sized + Sync>: Send + Sync {
    async fn execute(&self, client: &C, query: &QuerySpec, mode: QueryMode) -> E2eResult<QueryResult>;
}

/// Runs one query in the requested mode and turns the response into a
/// [`QueryResult`] carrying the observed duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TapQueryRunner;

#[async_trait]
impl<C: TapClient + ?Sized> QueryOperation<C> for TapQueryRunner {
    async fn execute(&self, client: &C, query: &QuerySpec, mode: QueryMode) -> E2eResult<QueryResult> {
        run_query_test(client, query, mode).await
    }
}

/// Execute a single query against `client` and time it.
///
/// Errors from the client are returned unchanged.
pub async fn run_query_test<C: TapClient + ?Sized>(
    client: &C,
    query: &QuerySpec,
    mode: QueryMode,
) -> E2eResult<QueryResult> {
    let (result, execution_duration) = match mode {
        QueryMode::Sync => timed(client.run_sync(&query.query)).await,
        QueryMode::Async => timed(client.run_async(&query.query)).await,
    };
    let result = result?;

    debug!(
        "{} query returned {} rows with status {} in {:.3}s",
        mode, result.row_count, result.status, execution_duration
    );

    Ok(QueryResult::from_spec(
        query,
        result.status,
        result.row_count,
        execution_duration,
    ))
}
