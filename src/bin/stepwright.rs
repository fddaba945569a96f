//! stepwright CLI - runs YAML acceptance scenarios against an API.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use stepwright::coverage::{self, CoverageReport};
use stepwright::{select, DefaultScenarioRunner, RunConfig, Scenario, ScenarioLoader, ScenarioResult};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Run acceptance scenarios against a multi-tenant configuration API.
#[derive(Parser, Debug)]
#[command(name = "stepwright", version, about)]
struct Cli {
    /// Scenario file or directory path.
    #[arg(short = 'p', long = "path")]
    path: Option<String>,

    /// Filter scenarios by name (partial match).
    #[arg(short = 'f', long = "filter")]
    filter: Option<String>,

    /// Only run scenarios carrying this tag.
    #[arg(long = "tag")]
    tag: Option<String>,

    /// Root URL of the API under test.
    #[arg(short = 'b', long = "base-url", env = "STEPWRIGHT_BASE_URL")]
    base_url: Option<String>,

    /// Token used by authenticated steps.
    #[arg(long = "token", env = "STEPWRIGHT_TOKEN")]
    token: Option<String>,

    /// Authorization header scheme.
    #[arg(long = "auth-scheme", default_value = "Bearer")]
    auth_scheme: String,

    /// Default organization slug.
    #[arg(long = "organization", env = "STEPWRIGHT_ORGANIZATION", default_value = "default")]
    organization: String,

    /// Timeout in seconds per request.
    #[arg(short = 't', long = "timeout", default_value_t = 30)]
    timeout: u64,

    /// Number of scenarios run concurrently.
    #[arg(short = 'j', long = "parallelism", default_value_t = 1)]
    parallelism: usize,

    /// Report which operations of this OpenAPI schema (JSON) the
    /// selected scenarios cover, instead of running them.
    #[arg(long = "coverage", value_name = "SCHEMA")]
    coverage: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn load_scenarios(path: Option<String>) -> Result<Vec<Scenario>> {
    let mut loader = ScenarioLoader::new();
    for default in ["features", "."] {
        loader.add_path(default);
    }

    let scenarios = match path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(anyhow!("Path does not exist: {}", path.display()));
            }
            loader.load_path(&path)?
        }
        None => loader.load_all()?,
    };

    if scenarios.is_empty() {
        return Err(anyhow!("No scenarios found"));
    }
    Ok(scenarios)
}

fn log_result(result: &ScenarioResult) {
    let status = if result.success() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!("{} scenario: {} ({} ms)", status, result.name, result.duration_ms);

    for (i, step) in result.steps.iter().enumerate() {
        debug!(
            "  {}. {} {} ({} ms)",
            i + 1,
            if step.success { "ok" } else { "failed" },
            step.name,
            step.duration_ms
        );
    }
    if let Some(detail) = result.failure() {
        error!("     \x1b[31m{}\x1b[0m", detail);
    }
}

fn log_coverage(report: &CoverageReport) {
    let summary = &report.summary;
    info!(
        "Coverage:\n  Operations: {}\n  Covered: {}\n  Uncovered: {}\n  Coverage: {:.2}% ({})",
        summary.total,
        summary.covered,
        summary.uncovered(),
        summary.percentage,
        summary.level
    );

    for (method, stats) in &report.by_method {
        info!(
            "  {:8} {:3}/{:3} ({:5.1}%) {}",
            method.to_string(),
            stats.covered,
            stats.total,
            stats.percentage,
            stats.level
        );
    }
    for (tag, stats) in &report.by_tag {
        info!(
            "  {:20} {:3}/{:3} ({:5.1}%) {}",
            tag, stats.covered, stats.total, stats.percentage, stats.level
        );
    }
    for op in &report.uncovered {
        info!("  uncovered: {} {} ({})", op.method, op.path, op.operation_id);
    }
    for (id, scenarios) in &report.unknown_operations {
        warn!(
            "Operation '{}' is not in the schema (tagged by: {})",
            id,
            scenarios.join(", ")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let scenarios = select(
        load_scenarios(args.path)?,
        args.filter.as_deref(),
        args.tag.as_deref(),
    );
    if scenarios.is_empty() {
        return Err(anyhow!("No scenarios matching the filter were found"));
    }

    if let Some(schema) = &args.coverage {
        let operations = coverage::extract_operations(&coverage::load_schema(schema)?);
        let report = coverage::analyze(&operations, &coverage::operation_tags(&scenarios));
        log_coverage(&report);
        return Ok(());
    }

    let base_url = args
        .base_url
        .ok_or_else(|| anyhow!("--base-url (or STEPWRIGHT_BASE_URL) is required to run scenarios"))?;
    let config = RunConfig {
        base_url,
        token: args.token,
        auth_scheme: args.auth_scheme,
        organization: args.organization,
        timeout: args.timeout,
        parallelism: args.parallelism,
    };
    let runner = DefaultScenarioRunner::from_config(&config)?;

    info!("Running {} scenario(s)...", scenarios.len());
    let suite = runner.run_suite(scenarios, config.parallelism).await;
    for result in &suite.scenarios {
        log_result(result);
    }

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Duration: {} ms",
        suite.scenarios.len(),
        suite.passed(),
        suite.failed(),
        suite.total_duration_ms
    );

    if suite.failed() > 0 {
        exit(1);
    }

    Ok(())
}
