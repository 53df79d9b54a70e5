//! agentest CLI: run suites, maintain the action cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_core::{Fingerprint, LlmProvider, MockLlmProvider, TestSpec};
use agentest_cli::agent::{ConversationLoop, LoopConfig};
use agentest_cli::cache::{ActionCache, LockRegistry, RetentionPolicy};
use agentest_cli::config::{load_config, Config};
use agentest_cli::driver::EchoDriver;
use agentest_cli::orchestrator::TestOrchestrator;
use agentest_cli::providers::{AnthropicConfig, AnthropicProvider};
use agentest_cli::tools::ToolBridge;

#[derive(Parser)]
#[command(name = "agentest")]
#[command(author, version, about = "Agentic browser test runner with an action replay cache")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    debug: bool,

    /// Override the cache directory
    #[arg(long, value_name = "DIR", global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute tests from a suite file
    Run(RunArgs),
    /// Inspect and maintain the action cache
    Cache(CacheArgs),
}

#[derive(Args)]
struct RunArgs {
    /// YAML suite file: a list of `{name, body}` tests
    file: PathBuf,

    /// Run only the named test
    #[arg(long)]
    test: Option<String>,

    /// Skip cache lookup and always consult the model
    #[arg(long)]
    no_cache: bool,

    /// Use the built-in mock provider and echo driver (no API key needed)
    #[arg(long)]
    offline: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    action: CacheAction,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Run the retention sweep over entries and artifacts
    Sweep {
        /// Delete everything, ignoring the configured retention budgets
        #[arg(long)]
        force_purge: bool,
    },
    /// Remove one cached entry, or the whole cache
    Invalidate {
        /// Fingerprint of the entry to remove
        fingerprint: Option<String>,
        /// Remove every entry
        #[arg(long)]
        all: bool,
    },
    /// Print one cached entry as JSON
    Show { fingerprint: String },
}

/// Suite file test shape. `file` defaults to the suite path itself.
#[derive(Debug, Deserialize)]
struct SuiteTest {
    name: String,
    #[serde(default)]
    file: Option<String>,
    body: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug);

    let mut config = load_config(cli.config.as_ref()).await?;
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = dir;
    }

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args, &config).await,
        Commands::Cache(args) => cmd_cache(args, &config).await,
    };
    if let Err(err) = result {
        error!("command failed: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(level: &str, debug: bool) {
    let directive = if debug { "debug" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn cmd_run(args: RunArgs, config: &Config) -> Result<()> {
    let registry = LockRegistry::new();
    let cache = Arc::new(ActionCache::new(config.cache.dir.clone(), registry.clone())?);

    // a ctrl-c must not leave lock sentinels behind for other processes
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, releasing held cache locks");
                registry.release_all();
                std::process::exit(130);
            }
        });
    }

    let provider: Arc<dyn LlmProvider> = if args.offline {
        Arc::new(MockLlmProvider)
    } else {
        let api_key = config
            .provider
            .api_key
            .clone()
            .context("no API key configured; set ANTHROPIC_API_KEY or pass --offline")?;
        Arc::new(AnthropicProvider::new(AnthropicConfig {
            api_key,
            model: config.provider.model.clone(),
            api_base: config.provider.api_base.clone(),
            timeout: Duration::from_secs(config.provider.timeout_secs),
        })?)
    };

    // the CLI drives the echo driver; a real browser backend is wired in by
    // the embedding harness through the library API
    let bridge = ToolBridge::new(Arc::new(EchoDriver), None);
    let loop_config = LoopConfig {
        max_retries: config.agent.max_retries,
        retry_backoff_ms: config.agent.retry_backoff_ms,
        rate_limit_cooldown_ms: config.agent.rate_limit_cooldown_ms,
        step_budget: config.agent.step_budget,
        max_tokens: config.provider.max_tokens,
    };
    let agent = ConversationLoop::new(provider, bridge, cache.clone(), loop_config);
    let orchestrator =
        TestOrchestrator::new(agent, cache.clone(), args.no_cache || !config.cache.enabled);

    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read suite file {}", args.file.display()))?;
    let suite: Vec<SuiteTest> = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse suite file {}", args.file.display()))?;
    let suite_path = args.file.display().to_string();

    let mut ran = 0usize;
    let mut failures = 0usize;
    for test in suite {
        if let Some(only) = &args.test {
            if &test.name != only {
                continue;
            }
        }
        ran += 1;
        let spec = TestSpec::new(
            test.name,
            test.file.unwrap_or_else(|| suite_path.clone()),
            test.body,
        );
        let report = orchestrator.execute(&spec).await?;
        let status = if report.verdict.is_passed() { "passed" } else { "failed" };
        let source = if report.from_cache { "cache" } else { "live" };
        println!(
            "{status} [{source}] {}: {} ({} tokens)",
            spec.name,
            report.verdict.reason,
            report.usage.total()
        );
        if !report.verdict.is_passed() {
            failures += 1;
        }
    }

    if ran == 0 {
        anyhow::bail!("no matching tests in {}", suite_path);
    }
    info!(ran, failures, "suite finished");
    if failures > 0 {
        anyhow::bail!("{failures} test(s) failed");
    }
    Ok(())
}

async fn cmd_cache(args: CacheArgs, config: &Config) -> Result<()> {
    let registry = LockRegistry::new();
    let cache = ActionCache::new(config.cache.dir.clone(), registry)?;

    match args.action {
        CacheAction::Sweep { force_purge } => {
            let policy = if force_purge {
                RetentionPolicy::force_purge()
            } else {
                RetentionPolicy {
                    entry_max_age_ms: config.cache.entry_max_age_ms,
                    entry_max_count: config.cache.entry_max_count,
                    artifact_max_age_ms: config.cache.artifact_max_age_ms,
                    artifacts_per_run: config.cache.artifacts_per_run,
                }
            };
            cache.run_retention(&policy).await
        }
        CacheAction::Invalidate { fingerprint, all } => match (fingerprint, all) {
            (_, true) => {
                cache.run_retention(&RetentionPolicy::force_purge()).await?;
                println!("cache cleared");
                Ok(())
            }
            (Some(digest), false) => {
                let fingerprint = Fingerprint::from_hex(digest)?;
                cache.delete(&fingerprint).await;
                println!("invalidated {fingerprint}");
                Ok(())
            }
            (None, false) => anyhow::bail!("pass a fingerprint or --all"),
        },
        CacheAction::Show { fingerprint } => {
            let fingerprint = Fingerprint::from_hex(fingerprint)?;
            match cache.get(&fingerprint).await {
                Some(entry) => {
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                    Ok(())
                }
                None => anyhow::bail!("no cache entry for {fingerprint}"),
            }
        }
    }
}
