//! PagePulse CLI
//!
//! Operator surface for the content performance goal engine:
//! - `recompute`: pull analytics, derive goals, append a snapshot
//! - `goals`: print the latest snapshot for the configured scope
//! - `distribution`: raw view-count histogram + top pages (display only)
//! - `serve`: HTTP endpoints for the admin console

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use pagepulse_analytics::{
    AnalyticsConfig, HttpReportClient, ReportIngestor, RetryPolicy, SystemClock,
};
use pagepulse_store::{GoalParams, GoalStore, JsonlSnapshotStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

mod server;

#[derive(Parser)]
#[command(name = "pagepulse")]
#[command(author, version, about = "PagePulse: content performance goal engine")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct CommonArgs {
    /// Append-only snapshot store (JSONL).
    #[arg(long, global = true, default_value = "pagepulse_goals.jsonl")]
    store: PathBuf,

    /// Snapshot scope (partition key).
    #[arg(long, global = true, default_value = "columns")]
    scope: String,

    /// Analytics property id (falls back to PAGEPULSE_PROPERTY_ID).
    #[arg(long, global = true)]
    property_id: Option<String>,

    /// Reporting service base URL (falls back to PAGEPULSE_ANALYTICS_URL).
    #[arg(long, global = true)]
    analytics_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute goals from the reporting service and persist a snapshot.
    Recompute {
        #[command(flatten)]
        window: WindowArgs,

        /// Drop statistical outliers before computing goals.
        #[arg(long)]
        outlier_filter: bool,

        /// Restrict to desktop/mobile/tablet device categories.
        ///
        /// Coarse bot-exclusion heuristic, not real bot detection.
        #[arg(long)]
        exclude_bots: bool,

        /// Fetch in pages of this size instead of one shot.
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Print the latest persisted snapshot for the scope.
    Goals,

    /// Show the raw view-count distribution (nothing is persisted).
    Distribution {
        #[command(flatten)]
        window: WindowArgs,

        /// Number of histogram buckets.
        #[arg(long, default_value_t = 10)]
        buckets: usize,

        /// Ranked top-N pages to list.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Serve the goal endpoints over HTTP.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8787")]
        listen: SocketAddr,

        /// Bearer token required for POST /recompute.
        #[arg(long)]
        admin_token: Option<String>,
    },
}

#[derive(Args, Clone)]
struct WindowArgs {
    /// Rolling window length in days (window is [today - days, yesterday]).
    #[arg(long, default_value_t = 28)]
    days: u32,

    /// Regex applied to page paths client-side.
    #[arg(long, default_value = r"^/column/[^/]+/?$")]
    filter: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagepulse=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let pipeline = Pipeline::build(&cli.common)?;

    match cli.command {
        Commands::Recompute {
            window,
            outlier_filter,
            exclude_bots,
            page_size,
        } => {
            let params = GoalParams {
                days: window.days,
                filter_regex: window.filter,
                exclude_bot_traffic: exclude_bots,
                outlier_filter,
            };
            cmd_recompute(&pipeline, &params, page_size).await
        }
        Commands::Goals => cmd_goals(&pipeline).await,
        Commands::Distribution {
            window,
            buckets,
            top,
        } => cmd_distribution(&pipeline, &window, buckets, top).await,
        Commands::Serve {
            listen,
            admin_token,
        } => server::serve(pipeline, listen, admin_token).await,
    }
}

/// Wired-up ingestor + goal store shared by all subcommands.
struct Pipeline {
    ingestor: Arc<ReportIngestor>,
    goals: Arc<GoalStore>,
}

/// Resolve the analytics connection settings, each independently:
/// property id from flag then `PAGEPULSE_PROPERTY_ID`, base URL from
/// flag then `PAGEPULSE_ANALYTICS_URL` then the hosted default, key
/// from `PAGEPULSE_ANALYTICS_KEY`.
fn resolve_config(
    common: &CommonArgs,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AnalyticsConfig> {
    let property_id = match &common.property_id {
        Some(property) => property.clone(),
        None => env("PAGEPULSE_PROPERTY_ID").context("PAGEPULSE_PROPERTY_ID is not set")?,
    };
    let base_url = match &common.analytics_url {
        Some(url) => url.clone(),
        None => env("PAGEPULSE_ANALYTICS_URL")
            .unwrap_or_else(|| "https://analyticsreporting.example.com".to_string()),
    };
    let key = env("PAGEPULSE_ANALYTICS_KEY").context("PAGEPULSE_ANALYTICS_KEY is not set")?;
    Ok(AnalyticsConfig::new(&property_id, &base_url, &key)?)
}

impl Pipeline {
    fn build(common: &CommonArgs) -> Result<Self> {
        let config = resolve_config(common, |name| std::env::var(name).ok())?;

        let clock = Arc::new(SystemClock);
        let client = Arc::new(HttpReportClient::new(config)?);
        let ingestor = Arc::new(ReportIngestor::new(
            client,
            RetryPolicy::default(),
            clock.clone(),
        ));
        let store = Arc::new(
            JsonlSnapshotStore::open(&common.store)
                .with_context(|| format!("failed to open store {}", common.store.display()))?,
        );
        let goals = Arc::new(GoalStore::new(
            ingestor.clone(),
            store,
            clock,
            &common.scope,
        ));

        Ok(Self { ingestor, goals })
    }
}

async fn cmd_recompute(
    pipeline: &Pipeline,
    params: &GoalParams,
    page_size: Option<u32>,
) -> Result<()> {
    let snapshot = match page_size {
        Some(page_size) => {
            pipeline
                .goals
                .compute_and_persist_paged(params, page_size)
                .await?
        }
        None => pipeline.goals.compute_and_persist(params).await?,
    };
    print_snapshot(&snapshot);
    Ok(())
}

async fn cmd_goals(pipeline: &Pipeline) -> Result<()> {
    match pipeline.goals.latest().await? {
        Some(snapshot) => print_snapshot(&snapshot),
        None => println!(
            "{} no snapshot for scope `{}` yet; run `pagepulse recompute`",
            "Goals".yellow().bold(),
            pipeline.goals.scope()
        ),
    }
    Ok(())
}

async fn cmd_distribution(
    pipeline: &Pipeline,
    window: &WindowArgs,
    buckets: usize,
    top: usize,
) -> Result<()> {
    let mut samples = pipeline
        .ingestor
        .fetch_views(window.days, &window.filter, false)
        .await?;
    if samples.is_empty() {
        println!(
            "{} no pages matched `{}` in the last {} days",
            "Distribution".yellow().bold(),
            window.filter,
            window.days
        );
        return Ok(());
    }

    let counts: Vec<u64> = samples.iter().map(|s| s.views).collect();
    println!(
        "{} days={} filter={} pages={}",
        "Distribution".green().bold(),
        window.days,
        window.filter,
        samples.len()
    );
    for bucket in pagepulse_stats::histogram(&counts, buckets) {
        println!(
            "  {:>8}..={:<8} {}",
            bucket.lower,
            bucket.upper,
            "#".repeat(bucket.count)
        );
    }

    samples.sort_by(|a, b| b.views.cmp(&a.views));
    println!("  {}", "top pages".cyan());
    for sample in samples.iter().take(top) {
        println!(
            "  {:>8} views  {:>5}s avg  {}",
            sample.views, sample.avg_engagement_secs, sample.path
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(property_id: Option<&str>, analytics_url: Option<&str>) -> CommonArgs {
        CommonArgs {
            store: PathBuf::from("pagepulse_goals.jsonl"),
            scope: "columns".to_string(),
            property_id: property_id.map(str::to_string),
            analytics_url: analytics_url.map(str::to_string),
        }
    }

    fn env_of<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn url_flag_is_honored_without_property_flag() {
        let env = env_of(&[
            ("PAGEPULSE_PROPERTY_ID", "prop-env"),
            ("PAGEPULSE_ANALYTICS_KEY", "key"),
            ("PAGEPULSE_ANALYTICS_URL", "https://env.example.com"),
        ]);
        let config = resolve_config(&common(None, Some("https://flag.example.com")), env).unwrap();
        assert_eq!(config.property_id, "prop-env");
        assert_eq!(config.base_url, "https://flag.example.com");
    }

    #[test]
    fn property_flag_is_honored_without_url_flag() {
        let env = env_of(&[
            ("PAGEPULSE_ANALYTICS_KEY", "key"),
            ("PAGEPULSE_ANALYTICS_URL", "https://env.example.com"),
        ]);
        let config = resolve_config(&common(Some("prop-flag"), None), env).unwrap();
        assert_eq!(config.property_id, "prop-flag");
        assert_eq!(config.base_url, "https://env.example.com");
    }

    #[test]
    fn url_defaults_when_neither_flag_nor_env_set() {
        let env = env_of(&[
            ("PAGEPULSE_PROPERTY_ID", "prop-env"),
            ("PAGEPULSE_ANALYTICS_KEY", "key"),
        ]);
        let config = resolve_config(&common(None, None), env).unwrap();
        assert_eq!(config.base_url, "https://analyticsreporting.example.com");
    }

    #[test]
    fn missing_key_or_property_is_an_error() {
        let no_key = env_of(&[("PAGEPULSE_PROPERTY_ID", "prop-env")]);
        let err = resolve_config(&common(None, None), no_key).unwrap_err();
        assert!(err.to_string().contains("PAGEPULSE_ANALYTICS_KEY"));

        let no_property = env_of(&[("PAGEPULSE_ANALYTICS_KEY", "key")]);
        let err = resolve_config(&common(None, None), no_property).unwrap_err();
        assert!(err.to_string().contains("PAGEPULSE_PROPERTY_ID"));
    }
}

fn print_snapshot(snapshot: &pagepulse_store::GoalSnapshot) {
    let fallback = if snapshot.sample_count == 0 {
        " (fallback)".yellow().to_string()
    } else {
        String::new()
    };
    println!(
        "{} scope={} computed_at={}{}",
        "Snapshot".green().bold(),
        snapshot.scope,
        snapshot.computed_at.to_rfc3339(),
        fallback
    );
    println!(
        "  base={} stretch={}",
        snapshot.base_goal.to_string().green(),
        snapshot.stretch_goal.to_string().cyan()
    );
    println!(
        "  mean={:.1} median={:.1} p90={:.1} max={} samples={}",
        snapshot.mean, snapshot.median, snapshot.p90, snapshot.max, snapshot.sample_count
    );
    println!(
        "  days={} filter={} exclude_bots={} outlier_filter={}",
        snapshot.range_days,
        snapshot.filter_regex,
        snapshot.exclude_bot_traffic,
        snapshot.outlier_filter
    );
}
