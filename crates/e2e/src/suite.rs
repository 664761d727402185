//! The validator's checks, each runnable on its own and reported uniformly

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rspval_common::config::{STILTS_FILENAME, STILTS_URL, TAPLINT_USERNAME};
use rspval_common::fixtures::load_queries;
use rspval_common::timer::timed;
use rspval_common::{AggregateResults, Config, Scenario, ServiceApp, TapApplication, TaplintLimits};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::E2eResult;
use crate::files::{FileManager, MIN_FILE_SIZE};
use crate::runner::{run_concurrent_test, RunContext};
use crate::tap::{TapClient, TapQueryRunner};
use crate::taplint::{LintSummary, TaplintService, TaplintValidationService};
use crate::validation::{validate_query_results, TapValidationService};

/// Outcome of one named check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Outcomes of every check of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteReport {
    pub checks: Vec<CheckReport>,
}

impl SuiteReport {
    pub fn push(&mut self, report: CheckReport) {
        self.checks.push(report);
    }

    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.checks.len() - self.passed()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn log_summary(&self) {
        info!(
            "Checks: {} passed, {} failed",
            self.passed(),
            self.failed()
        );
    }

    /// Write the report as JSON into `output_dir`
    pub fn write(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join("check-results.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Run `check` and turn its result into a report, logging the outcome
pub async fn run_check<T, F>(name: impl Into<String>, check: F) -> CheckReport
where
    F: Future<Output = E2eResult<T>>,
{
    let name = name.into();
    let (result, elapsed) = timed(check).await;
    let duration_ms = (elapsed * 1000.0) as u64;

    match result {
        Ok(_) => {
            info!("✓ {} ({} ms)", name, duration_ms);
            CheckReport {
                name,
                passed: true,
                duration_ms,
                error: None,
            }
        }
        Err(e) => {
            error!("✗ {} - {}", name, e);
            CheckReport {
                name,
                passed: false,
                duration_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Run one query load scenario and validate every result
pub async fn run_query_scenario<C>(
    config: &Config,
    client: Arc<C>,
    scenario: &Scenario,
) -> E2eResult<AggregateResults>
where
    C: TapClient + ?Sized + 'static,
{
    let queries: Arc<[_]> = load_queries(&config.data_dir, scenario.app())?.into();
    let ctx = RunContext::new(client, scenario.mode());

    let results = run_concurrent_test(Arc::new(TapQueryRunner), queries, scenario.users(), ctx).await?;
    validate_query_results(&results)?;

    for result in results.iter().flatten() {
        info!(
            "{} {} query [{}] test completed successfully with {} users after {:.2} seconds",
            scenario.app().as_str().to_uppercase(),
            scenario.mode(),
            result.query,
            scenario.users(),
            result.execution_duration
        );
    }

    Ok(results)
}

pub async fn check_tables<C: TapClient + ?Sized>(config: &Config, client: Arc<C>, app: TapApplication) -> E2eResult<()> {
    TapValidationService::new(client, app, config).validate_tables().await?;
    Ok(())
}

pub async fn check_uws<C: TapClient + ?Sized>(config: &Config, client: Arc<C>, app: TapApplication) -> E2eResult<()> {
    TapValidationService::new(client, app, config)
        .validate_uws_endpoint()
        .await?;
    Ok(())
}

pub async fn check_capabilities<C: TapClient + ?Sized>(
    config: &Config,
    client: Arc<C>,
    app: TapApplication,
) -> E2eResult<()> {
    TapValidationService::new(client, app, config)
        .validate_live_capabilities(&config.base_url, config.capability_includes(app))
        .await
}

/// Path of the STILTS jar, downloading it first when missing
pub async fn ensure_stilts(root: &Path) -> E2eResult<PathBuf> {
    let jar = root.join(STILTS_FILENAME);
    FileManager::download_file(STILTS_URL, &jar, MIN_FILE_SIZE).await?;
    Ok(jar)
}

/// Lint an application's TAP service with the given runner
pub async fn check_taplint(
    config: &Config,
    taplint: &TaplintService,
    app: TapApplication,
    limits: TaplintLimits,
) -> E2eResult<LintSummary> {
    let tap_url = config.url(ServiceApp::from(app));
    let run = taplint.run(&tap_url, TAPLINT_USERNAME, &config.token).await;

    let summary = TaplintValidationService::new(limits).validate(&run)?;
    info!(
        "{} taplint reported {} errors and {} warnings",
        app, summary.errors, summary.warnings
    );
    Ok(summary)
}
