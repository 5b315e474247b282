mod config;
mod output;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use logscope_logs::{
    FetchCache, GroupAggregator, GroupResults, GroupSpec, MultiGroupCoordinator, merge_for_display,
};
use logscope_store::CloudWatchStore;

use config::{Config, GroupConfig};
use output::{Format, SeenEvents};

/// Logscope - fetch the newest interesting log events across CloudWatch log groups
#[derive(Parser, Debug)]
#[command(name = "logscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log groups to fetch (overrides the groups in the config file)
    #[arg(value_name = "LOG_GROUP")]
    groups: Vec<String>,

    /// Config file (default: ~/.logscope/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// AWS profile
    #[arg(long)]
    profile: Option<String>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// How far back to look without a cached position (e.g. 15m, 1h, 2d)
    #[arg(long, value_parser = humantime::parse_duration)]
    since: Option<Duration>,

    /// Only read streams whose name starts with this prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Filter pattern sent with every event query
    #[arg(long)]
    filter: Option<String>,

    /// Signal events to collect per group before stopping
    #[arg(long)]
    target_count: Option<usize>,

    /// Concurrent stream fetches per group
    #[arg(long)]
    concurrency: Option<usize>,

    /// Poll every N seconds, printing only new events
    #[arg(long, value_name = "SECS")]
    watch: Option<u64>,

    /// Print noise events too
    #[arg(long)]
    show_noise: bool,

    /// Show timestamps in local time
    #[arg(long)]
    local_time: bool,

    /// Ignore and do not update the fetch cache
    #[arg(long)]
    no_cache: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Apply command line overrides on top of the config file
    fn apply(&self, config: &mut Config) {
        if let Some(profile) = &self.profile {
            config.profile = Some(profile.clone());
        }
        if let Some(region) = &self.region {
            config.region = Some(region.clone());
        }
        if let Some(since) = self.since {
            config.since = since;
        }
        if let Some(target_count) = self.target_count {
            config.target_count = target_count;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if !self.groups.is_empty() {
            config.groups = self
                .groups
                .iter()
                .map(|name| GroupConfig {
                    stream_prefix: self.prefix.clone(),
                    filter_pattern: self.filter.clone(),
                    ..GroupConfig::new(name.as_str())
                })
                .collect();
        }
    }

    fn format(&self) -> Format {
        Format {
            show_noise: self.show_noise,
            local_time: self.local_time,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let groups = config.group_specs();
    if groups.is_empty() {
        bail!("no log groups given; pass them as arguments or list them under [[groups]] in the config file");
    }

    let cache = if args.no_cache {
        FetchCache::in_memory(config.cache_ttl)
    } else {
        let path = FetchCache::default_path(&config.cache_profile())
            .context("cannot locate home directory for the fetch cache")?;
        FetchCache::open(path, config.cache_ttl)
    };

    // Without an explicit profile the credential chain honours AWS_PROFILE
    let store = CloudWatchStore::from_env(config.profile.as_deref(), config.region.as_deref()).await;
    let aggregator = GroupAggregator::new(
        Arc::new(store),
        Arc::new(Mutex::new(cache)),
        Arc::new(config.noise_filter()?),
    );
    let coordinator = Arc::new(MultiGroupCoordinator::new(aggregator, config.fetch_options()));

    match args.watch {
        None => {
            let results = coordinator.run_all(&groups).await;
            report(&results, &mut SeenEvents::new(), args.format())?;
            if results.values().all(|r| r.is_err()) {
                bail!("every log group failed");
            }
            Ok(())
        }
        Some(secs) => {
            let every = Duration::from_secs(secs.max(1));
            watch(&coordinator, &groups, every, args.format(), interrupted()).await
        }
    }
}

/// Resolves on ctrl-c; never resolves if the signal cannot be watched
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Poll all groups until `shutdown` resolves, printing only events not printed before
async fn watch(
    coordinator: &Arc<MultiGroupCoordinator>,
    groups: &[GroupSpec],
    every: Duration,
    format: Format,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    let mut seen = SeenEvents::new();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }
        let results = tokio::select! {
            _ = &mut shutdown => break,
            results = coordinator.run_all(groups) => results,
        };
        report(&results, &mut seen, format)?;

        let cache = coordinator.aggregator().cache().lock();
        for group in groups {
            if let Some(entry) = cache.get(&group.cache_key()) {
                seen.forget_through(&group.log_group, entry.last_seen_timestamp);
            }
        }
        drop(cache);
    }

    info!("interrupted, stopping watch");
    Ok(())
}

/// Print new events and warnings for one round of results
fn report(results: &GroupResults, seen: &mut SeenEvents, format: Format) -> Result<()> {
    let events = seen.retain_unseen(merge_for_display(results));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let written = output::print_events(&mut out, &events, format)?;
    out.flush()?;
    debug!(written, summary = %output::summary(results), "printed events");

    for warning in output::warnings(results) {
        eprintln!("Warning: {warning}");
    }
    Ok(())
}
