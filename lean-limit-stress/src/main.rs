use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lean_limit::DEFAULT_RETRIES;
use lean_limit::LimiterConfig;

mod load;
mod registry;

use load::LoadPlan;
use registry::Registry;

/// Hammer one lean-limit policy from many threads across many identities and
/// check that no identity is ever granted more than its policy allows.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Requests allowed per interval, also the burst size.
    #[arg(long, default_value_t = 100)]
    burst: u16,

    #[arg(long, default_value_t = 1_000)]
    interval_ms: u64,

    /// Compare-and-swap attempts per take.
    #[arg(long, default_value_t = DEFAULT_RETRIES.get())]
    retries: usize,

    /// JSON limiter config. Takes precedence over --burst, --interval-ms and --retries.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Distinct identities (e.g. client IPs) to spread load over.
    #[arg(long, default_value_t = 10_000)]
    identities: u64,

    #[arg(long, default_value_t = 8)]
    workers: usize,

    #[arg(long, default_value_t = 2_000)]
    duration_ms: u64,

    /// Tokens requested by every take.
    #[arg(long, default_value_t = 1)]
    take: u16,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl Args {
    fn limiter_config(&self) -> anyhow::Result<LimiterConfig> {
        let Some(path) = &self.config else {
            return Ok(LimiterConfig {
                burst: self.burst,
                interval_ms: self.interval_ms,
                retries: self.retries,
            });
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading limiter config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing limiter config {}", path.display()))
    }

    fn plan(&self) -> LoadPlan {
        LoadPlan {
            identities: self.identities,
            workers: self.workers,
            duration: Duration::from_millis(self.duration_ms),
            take: self.take,
            seed: self.seed,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    let config = args.limiter_config()?;
    let limiter = config.build().context("invalid limiter config")?;
    info!(
        burst = config.burst,
        interval_ms = config.interval_ms,
        retries = config.retries,
        "limiter configured"
    );

    let plan = args.plan();
    info!(?plan, "starting load");

    let registry = Registry::new(limiter);
    let outcome = load::run(&registry, &plan)?;
    outcome.report(&format!(
        "Token Bucket ({} per {}ms, {} identities)",
        config.burst,
        config.interval_ms,
        registry.len()
    ));

    let violations = outcome.violations(registry.limiter());
    for violation in &violations {
        error!(
            identity = violation.identity,
            admitted_tokens = violation.admitted_tokens,
            ceiling = violation.ceiling,
            remaining = ?registry.tokens(violation.identity),
            "identity exceeded its ceiling"
        );
    }
    anyhow::ensure!(
        violations.is_empty(),
        "{} identities exceeded their ceiling",
        violations.len()
    );

    info!("all identities within their ceiling");
    Ok(())
}
