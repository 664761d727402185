//! Runs YAML page checks through Playwright and compares their snapshots

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{E2eError, E2eResult};
use crate::playwright::{PlaywrightConfig, PlaywrightHandle, SpecRun, StepResult};
use crate::spec::PageSpec;
use crate::visual::{SnapshotComparator, VisualConfig};

/// Result of running a single page check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub snapshots: Vec<SnapshotResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub name: String,
    pub matches: bool,
    pub diff_pixels: u64,
    pub failure_dir: Option<String>,
}

/// Result of running a set of page checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

/// Runs page checks against the deployment's web UIs
pub struct UiRunner {
    config: UiConfig,
}

impl UiRunner {
    pub fn new(config: UiConfig) -> Self {
        Self { config }
    }

    /// Run all page checks in the specs directory
    pub async fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let specs = PageSpec::load_all(&self.config.specs_dir)?;
        self.run_specs(&specs).await
    }

    /// Run page checks matching a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = PageSpec::load_all(&self.config.specs_dir)?;
        let filtered: Vec<PageSpec> = PageSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered).await
    }

    /// Run a specific page check by name
    pub async fn run_test(&self, name: &str) -> E2eResult<TestResult> {
        let specs = PageSpec::load_all(&self.config.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Page check not found: {}", name)))?;

        self.run_spec(&spec).await
    }

    pub async fn run_specs(&self, specs: &[PageSpec]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} page check(s)...", specs.len());

        for spec in specs {
            let result = match self.run_spec(spec).await {
                Ok(result) => result,
                Err(e) => TestResult {
                    name: spec.name.clone(),
                    success: false,
                    duration_ms: 0,
                    steps: vec![],
                    snapshots: vec![],
                    error: Some(e.to_string()),
                },
            };

            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!("Page checks: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        Ok(TestSuiteResult {
            total: specs.len(),
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    /// Run a single page check
    pub async fn run_spec(&self, spec: &PageSpec) -> E2eResult<TestResult> {
        let start = Instant::now();
        debug!("Running page check: {}", spec.name);

        let playwright = PlaywrightHandle::new(self.config.playwright.clone())?;
        let run = playwright.run_spec(spec).await?;

        Ok(self.finish(spec, run, start))
    }

    fn finish(&self, spec: &PageSpec, run: SpecRun, start: Instant) -> TestResult {
        let mut test_error = run.error.clone();
        let mut snapshots = Vec::new();

        if test_error.is_none() && (self.config.snapshots || self.config.update_snapshots) {
            match self.compare_snapshots(spec, &run, &mut snapshots) {
                Ok(()) => {}
                Err(e) => test_error = Some(e.to_string()),
            }
        }

        TestResult {
            name: spec.name.clone(),
            success: test_error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps: run.steps,
            snapshots,
            error: test_error,
        }
    }

    /// Compares every snapshot screenshot and reports the first failure
    /// after all of them have been checked.
    fn compare_snapshots(
        &self,
        spec: &PageSpec,
        run: &SpecRun,
        results: &mut Vec<SnapshotResult>,
    ) -> E2eResult<()> {
        let comparator = SnapshotComparator::new(self.config.visual.clone())?;
        let mut first_error = None;

        for shot in run.screenshots.iter().filter(|s| s.snapshot) {
            if self.config.update_snapshots {
                comparator.update_snapshot(&shot.name, &std::fs::read(&shot.path)?)?;
                continue;
            }

            let outcome = comparator.compare_file(&shot.name, &shot.path, Some(spec.snapshot_threshold));
            let result = match &outcome {
                Ok(diff) => SnapshotResult {
                    name: shot.name.clone(),
                    matches: true,
                    diff_pixels: diff.diff_pixels,
                    failure_dir: None,
                },
                Err(E2eError::SnapshotMismatch { diff_pixels, dir, .. }) => SnapshotResult {
                    name: shot.name.clone(),
                    matches: false,
                    diff_pixels: *diff_pixels,
                    failure_dir: Some(dir.to_string_lossy().to_string()),
                },
                Err(_) => SnapshotResult {
                    name: shot.name.clone(),
                    matches: false,
                    diff_pixels: 0,
                    failure_dir: None,
                },
            };
            results.push(result);

            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write page check results to a JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("ui-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Configuration for the page check runner
#[derive(Debug, Clone)]
pub struct UiConfig {
    pub playwright: PlaywrightConfig,
    pub visual: VisualConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Compare snapshot screenshots
    pub snapshots: bool,
    /// Overwrite stored snapshots instead of comparing
    pub update_snapshots: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            playwright: PlaywrightConfig::default(),
            visual: VisualConfig::default(),
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
            snapshots: true,
            update_snapshots: false,
        }
    }
}
