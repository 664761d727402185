//! rspval: validate a Rubin Science Platform deployment
//!
//! Configuration comes from the environment (`HOSTNAME`, `TOKEN`,
//! `HEADLESS`, ...). Exit status is 0 when every check passed, 1 when a
//! check failed and 2 when the validator could not start.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rspval_common::config::default_scenarios;
use rspval_common::fixtures::load_taplint_maximums;
use rspval_common::{Config, QueryMode, Scenario, TapApplication};
use rspval_e2e::files::FileManager;
use rspval_e2e::playwright::PlaywrightConfig;
use rspval_e2e::suite::{self, SuiteReport};
use rspval_e2e::taplint::TaplintService;
use rspval_e2e::ui::{UiConfig, UiRunner};
use rspval_e2e::visual::VisualConfig;
use rspval_e2e::HttpTapClient;

#[derive(Parser, Debug)]
#[command(name = "rspval")]
#[command(author, version, about = "End-to-end validator for Rubin Science Platform deployments")]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding the query fixtures and taplint maximums
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding the YAML page specs
    #[arg(long, default_value = "specs", global = true)]
    specs: PathBuf,

    /// Output directory for results, screenshots and traces
    #[arg(short, long, default_value = "test-results", global = true)]
    output: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run TAP query load scenarios
    Queries {
        /// Only scenarios of this application (tap, ssotap)
        #[arg(long)]
        app: Option<TapApplication>,

        /// Run a single scenario in this mode (requires --app and --users)
        #[arg(long, requires_all = ["app", "users"])]
        mode: Option<QueryMode>,

        /// Simulated users of the single scenario
        #[arg(long, requires = "mode")]
        users: Option<usize>,
    },

    /// Compare the VOSI capabilities documents
    Capabilities,

    /// Check that the services publish tables
    Tables,

    /// Run a job through the UWS endpoint
    Uws,

    /// Lint the TAP services with STILTS taplint
    Taplint,

    /// Run the browser page checks
    Ui {
        /// Run only page checks with this tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Run only the page check with this name
        #[arg(short, long)]
        name: Option<String>,

        /// Overwrite stored snapshots instead of comparing
        #[arg(long)]
        update_snapshots: bool,
    },

    /// Run every check
    All,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(cli)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<bool> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }

    let home = rspval_common::home_dir().context("HOME is not set")?;
    let auth_file = FileManager::check_auth_file(&home).context("Auth file not found")?;

    info!("Validating {} (rspval {})", config.base_url, rspval_common::VERSION);

    let mut report = SuiteReport::default();
    let mut ui_ok = true;

    match &cli.command {
        Commands::Queries { app, mode, users } => {
            let scenarios = select_scenarios(*app, *mode, *users)?;
            run_queries(&config, &scenarios, &mut report).await?;
        }
        Commands::Capabilities => run_capabilities(&config, &mut report).await?,
        Commands::Tables => run_tables(&config, &mut report).await?,
        Commands::Uws => run_uws(&config, &mut report).await?,
        Commands::Taplint => run_taplint(&config, &mut report).await?,
        Commands::Ui {
            tag,
            name,
            update_snapshots,
        } => {
            ui_ok = run_ui(&config, &cli, auth_file, tag.as_deref(), name.as_deref(), *update_snapshots).await?;
        }
        Commands::All => {
            run_tables(&config, &mut report).await?;
            run_capabilities(&config, &mut report).await?;
            run_uws(&config, &mut report).await?;
            run_queries(&config, &default_scenarios(), &mut report).await?;
            run_taplint(&config, &mut report).await?;
            ui_ok = run_ui(&config, &cli, auth_file, None, None, false).await?;
        }
    }

    if !report.checks.is_empty() {
        report.log_summary();
        report.write(&cli.output)?;
    }

    Ok(report.success() && ui_ok)
}

fn select_scenarios(
    app: Option<TapApplication>,
    mode: Option<QueryMode>,
    users: Option<usize>,
) -> anyhow::Result<Vec<Scenario>> {
    match (app, mode, users) {
        (Some(app), Some(mode), Some(users)) => {
            let users = NonZeroUsize::new(users).context("--users must be at least 1")?;
            Ok(vec![Scenario::new(app, mode, users)])
        }
        (Some(app), _, _) => Ok(default_scenarios().into_iter().filter(|s| s.app() == app).collect()),
        _ => Ok(default_scenarios()),
    }
}

fn clients(config: &Config) -> anyhow::Result<Vec<(TapApplication, Arc<HttpTapClient>)>> {
    TapApplication::ALL
        .iter()
        .map(|&app| -> anyhow::Result<_> { Ok((app, Arc::new(HttpTapClient::new(config, app)?))) })
        .collect()
}

async fn run_queries(config: &Config, scenarios: &[Scenario], report: &mut SuiteReport) -> anyhow::Result<()> {
    for scenario in scenarios {
        let client = Arc::new(HttpTapClient::new(config, scenario.app())?);
        report.push(suite::run_check(scenario.description(), suite::run_query_scenario(config, client, scenario)).await);
    }
    Ok(())
}

async fn run_tables(config: &Config, report: &mut SuiteReport) -> anyhow::Result<()> {
    for (app, client) in clients(config)? {
        report.push(suite::run_check(format!("{} tables", app), suite::check_tables(config, client, app)).await);
    }
    Ok(())
}

async fn run_capabilities(config: &Config, report: &mut SuiteReport) -> anyhow::Result<()> {
    for (app, client) in clients(config)? {
        report.push(
            suite::run_check(format!("{} capabilities", app), suite::check_capabilities(config, client, app)).await,
        );
    }
    Ok(())
}

async fn run_uws(config: &Config, report: &mut SuiteReport) -> anyhow::Result<()> {
    for (app, client) in clients(config)? {
        report.push(suite::run_check(format!("{} UWS endpoint", app), suite::check_uws(config, client, app)).await);
    }
    Ok(())
}

async fn run_taplint(config: &Config, report: &mut SuiteReport) -> anyhow::Result<()> {
    let maximums = load_taplint_maximums(&config.data_dir)?;
    let jar = suite::ensure_stilts(&std::env::current_dir()?).await?;
    let taplint = TaplintService::new(&jar);

    for app in TapApplication::ALL {
        let limits = maximums.get(app)?;
        report.push(
            suite::run_check(format!("{} taplint", app), suite::check_taplint(config, &taplint, app, limits)).await,
        );
    }
    Ok(())
}

async fn run_ui(
    config: &Config,
    cli: &Cli,
    auth_file: PathBuf,
    tag: Option<&str>,
    name: Option<&str>,
    update_snapshots: bool,
) -> anyhow::Result<bool> {
    let runner = UiRunner::new(UiConfig {
        playwright: PlaywrightConfig::from_config(config, Some(auth_file), &cli.output),
        visual: VisualConfig {
            failures_dir: cli.output.join("failures"),
            ..Default::default()
        },
        specs_dir: cli.specs.clone(),
        output_dir: cli.output.clone(),
        snapshots: config.snapshots,
        update_snapshots,
    });

    let results = if let Some(name) = name {
        let result = runner.run_test(name).await?;
        rspval_e2e::ui::TestSuiteResult {
            total: 1,
            passed: usize::from(result.success),
            failed: usize::from(!result.success),
            duration_ms: result.duration_ms,
            results: vec![result],
        }
    } else if let Some(tag) = tag {
        runner.run_tagged(tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;
    Ok(results.failed == 0)
}
