//! Incremental fetch cache
//!
//! Remembers, per query shape, the newest event seen so far so repeated
//! invocations only ask the store for newer events. Entries expire after a
//! TTL (default 24 hours), after which the next fetch scans the full window
//! again.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use logscope_types::{CacheEntry, CacheKey, now_ms};

/// Default TTL for cache entries (24 hours)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors writing the cache file
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fetch state persisted as one JSON document keyed by [`CacheKey`]
#[derive(Debug)]
pub struct FetchCache {
    /// None for a cache that is never persisted
    path: Option<PathBuf>,
    entries: BTreeMap<CacheKey, CacheEntry>,
    ttl: Duration,

    /// Bumped on every snapshot
    generation: u64,
    /// Generation of the snapshot last written to disk
    written: Arc<Mutex<u64>>,
}

impl FetchCache {
    /// Cache file path for a profile, e.g. `~/.logscope/cache/default.json`
    pub fn default_path(profile: &str) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let name: String = profile
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = if name.is_empty() { "default".to_string() } else { name };
        Some(home.join(".logscope").join("cache").join(format!("{name}.json")))
    }

    /// Load the cache from disk.
    ///
    /// A missing file yields an empty cache. A malformed file is discarded
    /// with a warning; the next save overwrites it.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => parse_entries(&path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read fetch cache, starting empty");
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "loaded fetch cache");
        Self {
            path: Some(path),
            entries,
            ttl,
            generation: 0,
            written: Arc::default(),
        }
    }

    /// Create a cache that lives only in memory
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            ttl,
            generation: 0,
            written: Arc::default(),
        }
    }

    /// Get a usable entry for a key
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, now_ms())
    }

    /// Get a usable entry for a key as of `now`.
    ///
    /// Stale entries, and entries claiming events from the future (clock
    /// skew), are treated as absent.
    pub fn get_at(&self, key: &CacheKey, now: i64) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_stale(now, self.ttl) {
            debug!(%key, "cache entry expired");
            return None;
        }
        if entry.last_seen_timestamp > now {
            warn!(%key, last_seen = entry.last_seen_timestamp, now, "cache entry is in the future, ignoring");
            return None;
        }
        Some(*entry)
    }

    /// Store an entry
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Drop entries that have expired as of `now`
    pub fn prune_expired(&mut self, now: i64) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| !e.is_stale(now, ttl));
    }

    /// Prune expired entries and serialize the cache for writing.
    ///
    /// Returns None for an in-memory cache. The write itself happens in
    /// [`PendingWrite::write`], so callers can release their lock first.
    pub fn snapshot(&mut self) -> Result<Option<PendingWrite>, CacheError> {
        self.prune_expired(now_ms());
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let content = serde_json::to_string_pretty(&self.entries)?;
        self.generation += 1;
        Ok(Some(PendingWrite {
            path: path.clone(),
            content,
            generation: self.generation,
            written: Arc::clone(&self.written),
        }))
    }

    /// Prune expired entries and write the cache to disk atomically
    pub fn save(&mut self) -> Result<(), CacheError> {
        match self.snapshot()? {
            Some(pending) => pending.write(),
            None => Ok(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A serialized cache document waiting to be written
#[derive(Debug)]
pub struct PendingWrite {
    path: PathBuf,
    content: String,
    generation: u64,
    written: Arc<Mutex<u64>>,
}

impl PendingWrite {
    /// Write the document unless a newer snapshot already reached disk.
    ///
    /// Does blocking file IO.
    pub fn write(self) -> Result<(), CacheError> {
        let mut written = self.written.lock();
        if *written >= self.generation {
            debug!(path = %self.path.display(), generation = self.generation, "newer cache snapshot already written");
            return Ok(());
        }
        write_atomic(&self.path, self.content.as_bytes()).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        *written = self.generation;
        Ok(())
    }
}

/// Parse the cache document, dropping entries that do not deserialize
fn parse_entries(path: &Path, content: &str) -> BTreeMap<CacheKey, CacheEntry> {
    let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "fetch cache is corrupt, discarding");
            return BTreeMap::new();
        }
    };

    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) if entry.is_consistent() => Some((CacheKey::from(key), entry)),
            Ok(_) => {
                warn!(key = %key, "inconsistent cache entry, discarding");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "malformed cache entry, discarding");
                None
            }
        })
        .collect()
}

/// Write via a temp file in the same directory, then rename over `path`
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}
