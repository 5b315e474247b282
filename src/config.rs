use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use logscope_logs::{
    DEFAULT_CACHE_TTL, DEFAULT_MAX_PAGES, DEFAULT_NOISE_PATTERNS, FetchOptions, GroupSpec,
    NoiseFilter, validate_log_group,
};
use logscope_types::MAX_DISCOVERY_CAP;

/// Top-level configuration, read from `~/.logscope/config.toml`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// AWS profile. Default: resolved by the credential chain (AWS_PROFILE).
    #[serde(default)]
    pub profile: Option<String>,

    /// AWS region. Default: resolved by the credential chain.
    #[serde(default)]
    pub region: Option<String>,

    /// Window length when there is no cached position. Default: 1h.
    #[serde(default = "default_since", with = "humantime_serde")]
    pub since: Duration,

    /// Signal events to collect before a group stops. Default: 100.
    #[serde(default = "default_target_count")]
    pub target_count: usize,

    /// Concurrent stream fetches per group. Default: 8.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Wall-clock budget per group. Default: 30s.
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    /// Streams listed per group. Default: 500.
    #[serde(default = "default_discovery_cap")]
    pub discovery_cap: usize,

    /// Result pages read per stream. Default: 10.
    #[serde(default = "default_max_pages")]
    pub max_pages_per_stream: usize,

    /// Events held per group. Default: 50000.
    #[serde(default = "default_memory_cap")]
    pub memory_cap: usize,

    /// Age after which cached positions are ignored. Default: 24h.
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Substrings (or `re:` regexes) that mark an event as noise
    #[serde(default = "default_noise_patterns")]
    pub noise_patterns: Vec<String>,

    /// Exclude literal noise patterns in the store query. Default: true.
    #[serde(default = "default_server_side_exclusion")]
    pub server_side_exclusion: bool,

    /// Log groups fetched when none are given on the command line
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// One `[[groups]]` entry
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub log_group: String,

    #[serde(default)]
    pub stream_prefix: Option<String>,

    #[serde(default)]
    pub filter_pattern: Option<String>,

    #[serde(default)]
    pub discovery_cap: Option<usize>,
}

impl GroupConfig {
    pub fn new(log_group: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            stream_prefix: None,
            filter_pattern: None,
            discovery_cap: None,
        }
    }

    fn to_spec(&self) -> GroupSpec {
        GroupSpec {
            log_group: self.log_group.clone(),
            stream_prefix: self.stream_prefix.clone(),
            filter_pattern: self.filter_pattern.clone(),
            discovery_cap: self.discovery_cap,
        }
    }
}

fn default_since() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_target_count() -> usize {
    100
}

fn default_concurrency() -> usize {
    8
}

fn default_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_discovery_cap() -> usize {
    500
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_memory_cap() -> usize {
    50_000
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_noise_patterns() -> Vec<String> {
    DEFAULT_NOISE_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_server_side_exclusion() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: None,
            region: None,
            since: default_since(),
            target_count: default_target_count(),
            concurrency: default_concurrency(),
            deadline: default_deadline(),
            discovery_cap: default_discovery_cap(),
            max_pages_per_stream: default_max_pages(),
            memory_cap: default_memory_cap(),
            cache_ttl: default_cache_ttl(),
            noise_patterns: default_noise_patterns(),
            server_side_exclusion: default_server_side_exclusion(),
            groups: Vec::new(),
        }
    }
}

impl Config {
    /// `~/.logscope/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".logscope").join("config.toml"))
    }

    /// Load configuration from a TOML file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: Config = toml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Check the configuration for errors
    pub fn validate(&self) -> Result<()> {
        if self.target_count == 0 {
            bail!("target_count must be positive");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be positive");
        }
        if self.deadline.is_zero() {
            bail!("deadline must be positive");
        }
        if self.since.is_zero() {
            bail!("since must be positive");
        }
        if self.discovery_cap == 0 || self.discovery_cap > MAX_DISCOVERY_CAP {
            bail!("discovery_cap must be between 1 and {MAX_DISCOVERY_CAP}");
        }
        if self.max_pages_per_stream == 0 {
            bail!("max_pages_per_stream must be positive");
        }
        if self.memory_cap == 0 {
            bail!("memory_cap must be positive");
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            validate_log_group(&group.log_group)?;
            if !seen.insert(group.log_group.as_str()) {
                bail!("log group listed more than once: {}", group.log_group);
            }
            if let Some(cap) = group.discovery_cap {
                if cap == 0 || cap > MAX_DISCOVERY_CAP {
                    bail!(
                        "discovery_cap for {} must be between 1 and {MAX_DISCOVERY_CAP}",
                        group.log_group
                    );
                }
            }
        }

        self.noise_filter()?;
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            since: self.since,
            target_count: self.target_count,
            concurrency: self.concurrency,
            discovery_cap: self.discovery_cap,
            max_pages_per_stream: self.max_pages_per_stream,
            memory_cap: self.memory_cap,
            deadline: self.deadline,
            cache_ttl: self.cache_ttl,
            server_side_exclusion: self.server_side_exclusion,
        }
    }

    pub fn group_specs(&self) -> Vec<GroupSpec> {
        self.groups.iter().map(GroupConfig::to_spec).collect()
    }

    /// Profile name that selects the cache file
    pub fn cache_profile(&self) -> String {
        self.profile
            .clone()
            .or_else(|| std::env::var("AWS_PROFILE").ok())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn noise_filter(&self) -> Result<NoiseFilter> {
        NoiseFilter::new(&self.noise_patterns).context("invalid noise pattern")
    }
}
