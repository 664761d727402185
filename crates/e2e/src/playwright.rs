//! Playwright browser automation
//!
//! A page spec is compiled into one Node script that drives a single browser
//! context through every step. Progress is reported back as JSON lines on
//! stdout, one per completed step, followed by a final success or failure
//! record.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use rspval_common::{Config, ServiceApp};
use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::spec::{PageSpec, PageStep, BASE_URL_PLACEHOLDER};

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: PlaywrightConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Result of executing a page step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// A screenshot taken while running a spec
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub name: String,
    pub path: PathBuf,
    /// Compare against the stored snapshot
    pub snapshot: bool,
}

/// Outcome of running a whole spec through Playwright
#[derive(Debug, Clone)]
pub struct SpecRun {
    pub steps: Vec<StepResult>,
    pub screenshots: Vec<Screenshot>,
    pub error: Option<String>,
}

/// Lines the generated script writes to stdout
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEvent {
    Failure {
        #[serde(default)]
        step: Option<usize>,
        error: String,
    },
    Step {
        step: usize,
        duration_ms: u64,
    },
    Done {
        #[allow(dead_code)]
        success: bool,
    },
}

fn js(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

impl PlaywrightHandle {
    /// Create a new Playwright handle
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;
        std::fs::create_dir_all(&config.screenshot_dir)?;
        if let Some(dir) = &config.trace_dir {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Self { config })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Run every step of `spec` in one browser context
    pub async fn run_spec(&self, spec: &PageSpec) -> E2eResult<SpecRun> {
        let script = self.build_script(spec)?;

        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("check.js");
        std::fs::write(&script_path, &script)?;

        debug!("Running Playwright script for {}: {}", spec.name, script_path.display());

        // The script lives in a temp dir, so point module resolution back at the project
        let node_path = std::env::current_dir()?.join("node_modules");
        let output = TokioCommand::new("node")
            .arg(&script_path)
            .env("NODE_PATH", node_path)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut run = self.collect_run(spec, &stdout);

        if !output.status.success() && run.error.is_none() {
            run.error = Some(format!("Script failed:\nstdout: {}\nstderr: {}", stdout, stderr));
        }

        Ok(run)
    }

    fn collect_run(&self, spec: &PageSpec, stdout: &str) -> SpecRun {
        let mut steps = Vec::new();
        let mut error = None;

        for line in stdout.lines() {
            let Ok(event) = serde_json::from_str::<ScriptEvent>(line) else {
                if !line.trim().is_empty() {
                    info!("[{}] {}", spec.name, line);
                }
                continue;
            };

            match event {
                ScriptEvent::Step { step, duration_ms } => {
                    let Some(page_step) = spec.steps.get(step) else {
                        warn!("Script reported unknown step {}", step);
                        continue;
                    };
                    steps.push(StepResult {
                        success: true,
                        step_name: page_step.name(),
                        duration_ms,
                        error: None,
                        screenshot_path: self.screenshot_path(page_step),
                    });
                }
                ScriptEvent::Failure { step, error: message } => {
                    let step_name = step
                        .and_then(|i| spec.steps.get(i))
                        .map(|s| s.name())
                        .unwrap_or_else(|| "setup".to_string());
                    steps.push(StepResult {
                        success: false,
                        step_name: step_name.clone(),
                        duration_ms: 0,
                        error: Some(message.clone()),
                        screenshot_path: None,
                    });
                    error = Some(format!("{}: {}", step_name, message));
                }
                ScriptEvent::Done { .. } => {}
            }
        }

        let screenshots = spec
            .steps
            .iter()
            .take(steps.iter().filter(|s| s.success).count())
            .filter_map(|step| match step {
                PageStep::Screenshot { name, snapshot, .. } => Some(Screenshot {
                    name: name.clone(),
                    path: self.config.screenshot_dir.join(format!("{}.png", name)),
                    snapshot: *snapshot,
                }),
                _ => None,
            })
            .collect();

        SpecRun {
            steps,
            screenshots,
            error,
        }
    }

    fn screenshot_path(&self, step: &PageStep) -> Option<PathBuf> {
        match step {
            PageStep::Screenshot { name, .. } => {
                Some(self.config.screenshot_dir.join(format!("{}.png", name)))
            }
            _ => None,
        }
    }

    fn expand(&self, s: &str) -> String {
        s.replace(BASE_URL_PLACEHOLDER, &self.config.base_url)
    }

    fn navigate_url(&self, app: Option<&str>, url: Option<&str>) -> E2eResult<String> {
        match (app, url) {
            (Some(app), _) => {
                let app: ServiceApp = app.parse()?;
                Ok(format!("{}{}", self.config.base_url, app.path()))
            }
            (None, Some(url)) if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(self.expand(url))
            }
            (None, Some(url)) => Ok(format!("{}{}", self.config.base_url, self.expand(url))),
            (None, None) => Err(E2eError::SpecParse("navigate step needs an app or a url".to_string())),
        }
    }

    /// Build the Playwright script for a spec
    pub fn build_script(&self, spec: &PageSpec) -> E2eResult<String> {
        let mut script = String::new();

        let storage_state = match (&self.config.storage_state, spec.authenticated) {
            (Some(path), true) => format!("storageState: {}, ", js(&path.to_string_lossy())),
            _ => String::new(),
        };

        script.push_str(&format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const {{ expect }} = require('@playwright/test');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    {storage_state}viewport: {{ width: {width}, height: {height} }}
  }});
  context.setDefaultTimeout({timeout});
  const page = await context.newPage();
  let current = null;
  let started = 0;
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            storage_state = storage_state,
            width = spec.viewport.width,
            height = spec.viewport.height,
            timeout = self.config.default_timeout_ms,
        ));

        if self.config.trace_dir.is_some() {
            script.push_str(
                "  await context.tracing.start({ screenshots: true, snapshots: true, sources: true });\n",
            );
        }

        script.push_str("\n  try {\n");

        for (i, step) in spec.steps.iter().enumerate() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, step.name()));
            script.push_str(&format!("    current = {}; started = Date.now();\n", i));
            script.push_str(&self.step_to_js(step)?);
            script.push_str(&format!(
                "\n    console.log(JSON.stringify({{ step: {}, duration_ms: Date.now() - started }}));\n",
                i
            ));
        }

        let trace_stop = match &self.config.trace_dir {
            Some(dir) => {
                let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
                let path = dir.join(format!("{}-{}-trace.zip", stamp, spec.name));
                format!(
                    "    await context.tracing.stop({{ path: {} }});\n",
                    js(&path.to_string_lossy())
                )
            }
            None => String::new(),
        };

        script.push_str(&format!(
            r#"
    console.log(JSON.stringify({{ success: true }}));
  }} catch (error) {{
    console.log(JSON.stringify({{ success: false, step: current, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
{trace_stop}    await context.close();
    await browser.close();
  }}
}})();
"#,
            trace_stop = trace_stop,
        ));

        Ok(script)
    }

    /// Convert a step to JavaScript code
    fn step_to_js(&self, step: &PageStep) -> E2eResult<String> {
        let locator = |selector: &str| format!("page.locator({})", js(&self.expand(selector)));
        let timeout = |ms: Option<u64>| {
            ms.map(|ms| format!("{{ timeout: {} }}", ms))
                .unwrap_or_else(|| "{}".to_string())
        };

        let code = match step {
            PageStep::Navigate { app, url, timeout_ms } => {
                let target = self.navigate_url(app.as_deref(), url.as_deref())?;
                format!("    await page.goto({}, {});", js(&target), timeout(*timeout_ms))
            }
            PageStep::Click { selector, timeout_ms, double } => {
                let action = if *double { "dblclick" } else { "click" };
                format!("    await {}.{}({});", locator(selector), action, timeout(*timeout_ms))
            }
            PageStep::Fill { selector, value } => {
                format!("    await {}.fill({});", locator(selector), js(&self.expand(value)))
            }
            PageStep::Press { selector, key } => match selector {
                Some(sel) => format!("    await {}.press({});", locator(sel), js(key)),
                None => format!("    await page.keyboard.press({});", js(key)),
            },
            PageStep::Wait { selector, timeout_ms, state } => {
                format!(
                    "    await page.waitForSelector({}, {{ state: '{}', timeout: {} }});",
                    js(&self.expand(selector)),
                    state.as_str(),
                    timeout_ms
                )
            }
            PageStep::Sleep { ms } => {
                format!("    await page.waitForTimeout({});", ms)
            }
            PageStep::Assert {
                selector,
                visible,
                text,
                text_contains,
                text_not_contains,
                count,
                timeout_ms,
            } => {
                let target = locator(selector);
                let opts = timeout(*timeout_ms);
                let mut assertions = Vec::new();

                match visible {
                    Some(true) => assertions.push(format!(
                        "    await expect({}).toBeVisible({});",
                        target, opts
                    )),
                    Some(false) => assertions.push(format!(
                        "    await expect({}).toBeHidden({});",
                        target, opts
                    )),
                    None => {}
                }

                if let Some(t) = text {
                    assertions.push(format!(
                        "    await expect({}).toHaveText({}, {});",
                        target,
                        js(&self.expand(t)),
                        opts
                    ));
                }

                if let Some(tc) = text_contains {
                    assertions.push(format!(
                        "    await expect({}).toContainText({}, {});",
                        target,
                        js(&self.expand(tc)),
                        opts
                    ));
                }

                if let Some(tn) = text_not_contains {
                    assertions.push(format!(
                        "    await expect({}).not.toContainText({}, {});",
                        target,
                        js(&self.expand(tn)),
                        opts
                    ));
                }

                if let Some(c) = count {
                    assertions.push(format!(
                        "    await expect({}).toHaveCount({}, {});",
                        target, c, opts
                    ));
                }

                assertions.join("\n")
            }
            PageStep::Screenshot { name, selector, full_page, .. } => {
                let path = self.config.screenshot_dir.join(format!("{}.png", name));
                let path = js(&path.to_string_lossy());

                match selector {
                    Some(sel) => format!("    await {}.screenshot({{ path: {} }});", locator(sel), path),
                    None => format!(
                        "    await page.screenshot({{ path: {}, fullPage: {} }});",
                        path, full_page
                    ),
                }
            }
            PageStep::Log { message } => {
                format!("    console.log({});", js(&format!("[CHECK] {}", message)))
            }
        };

        Ok(code)
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub base_url: String,
    pub screenshot_dir: PathBuf,
    pub browser: Browser,
    pub headless: bool,
    /// Browser storage state used for authenticated specs
    pub storage_state: Option<PathBuf>,
    pub default_timeout_ms: u64,
    /// Where traces are written; `None` disables tracing
    pub trace_dir: Option<PathBuf>,
}

impl PlaywrightConfig {
    /// Derive the browser settings from the validator configuration
    pub fn from_config(config: &Config, storage_state: Option<PathBuf>, output_dir: &std::path::Path) -> Self {
        Self {
            base_url: config.base_url.clone(),
            screenshot_dir: output_dir.join("screenshots"),
            browser: Browser::Chromium,
            headless: config.headless,
            storage_state,
            default_timeout_ms: config.selector_timeout.as_millis() as u64,
            trace_dir: config.tracing.then(|| output_dir.join("traces")),
        }
    }
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data-dev.lsst.cloud".to_string(),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            browser: Browser::Chromium,
            headless: true,
            storage_state: None,
            default_timeout_ms: 180_000,
            trace_dir: None,
        }
    }
}
