//! Persisted cache of completed search payloads.
//!
//! One JSON file per entry under the app data directory, keyed by
//! `(query, search type, llm flag)` and bounded by a 24h TTL plus an entry
//! count cap. Reads re-validate the TTL so a caller never sees stale data.

use crate::model::{ResultEntry, SearchType};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const KEY_PREFIX: &str = "paper-search";
const DEFAULT_MAX_ENTRIES: usize = 200;

/// Snapshot of a completed search, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePayload {
    pub results: Vec<ResultEntry>,
    pub total_results: u64,
    #[serde(default)]
    pub rewritten_terms: Vec<String>,
    /// Measured search latency in milliseconds.
    pub search_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    /// Unix seconds at write time; entries self-describe their age.
    timestamp: i64,
    #[serde(flatten)]
    payload: CachePayload,
}

#[derive(Debug, Deserialize)]
struct StoredTimestamp {
    timestamp: i64,
}

#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    max_entries: usize,
}

impl CacheStore {
    /// Open the store at the platform data directory.
    pub fn open() -> Result<Self> {
        let dir = dirs::data_dir()
            .context("no platform data directory")?
            .join("paper-search-cli")
            .join("search-cache");
        Self::at(dir)
    }

    /// Open the store at an explicit directory (tests, overrides).
    pub fn at(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            max_entries: DEFAULT_MAX_ENTRIES,
        })
    }

    /// Deterministic key for one `(query, search type, llm flag)` combination.
    /// The query component is percent-encoded so a query containing the
    /// separator cannot collide with another key.
    pub fn cache_key(query: &str, search_type: SearchType, llm_enabled: bool) -> String {
        format!(
            "{KEY_PREFIX}:{}:{}:{}",
            urlencoding::encode(query),
            search_type.as_query_str(),
            llm_enabled
        )
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys contain ':' and '%'; encode once more for a filename-safe form.
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }

    /// Entry for `key` if present and younger than the TTL. Expired entries
    /// are deleted on the way out and reported as absent.
    pub fn load(&self, key: &str) -> Option<CachePayload> {
        let path = self.entry_path(key);
        let body = fs::read_to_string(&path).ok()?;
        let entry: StoredEntry = match serde_json::from_str(&body) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "dropping unreadable cache entry");
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        let age = now_unix().saturating_sub(entry.timestamp);
        if age >= CACHE_TTL.as_secs() as i64 {
            debug!(key, age_s = age, "evicting expired cache entry");
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(entry.payload)
    }

    /// Write `payload` under `key` with the current timestamp. A rejected
    /// write (capacity reached, or the filesystem refusing it) triggers a
    /// bulk eviction of the oldest half; the write itself is not retried.
    pub fn save(&self, key: &str, payload: &CachePayload) -> Result<()> {
        let path = self.entry_path(key);
        if !path.exists() && self.entry_count() >= self.max_entries {
            let evicted = self.evict_oldest_half().unwrap_or(0);
            warn!(key, evicted, "cache at capacity; write dropped");
            anyhow::bail!("cache store at capacity ({} entries)", self.max_entries);
        }
        let entry = StoredEntry {
            timestamp: now_unix(),
            payload: payload.clone(),
        };
        let body = serde_json::to_string(&entry)?;
        if let Err(e) = fs::write(&path, body) {
            let evicted = self.evict_oldest_half().unwrap_or(0);
            warn!(key, evicted, error = %e, "cache write rejected; write dropped");
            return Err(e).with_context(|| format!("write cache entry {}", path.display()));
        }
        Ok(())
    }

    /// Delete the oldest `floor(N/2)` entries by write timestamp. Returns the
    /// number of entries removed.
    pub fn evict_oldest_half(&self) -> Result<usize> {
        let mut entries: Vec<(i64, PathBuf)> = Vec::new();
        for item in fs::read_dir(&self.dir).context("enumerate cache directory")? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(body) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(stamp) = serde_json::from_str::<StoredTimestamp>(&body) else {
                continue;
            };
            entries.push((stamp.timestamp, path));
        }
        entries.sort_by_key(|(timestamp, _)| *timestamp);
        let victims = entries.len() / 2;
        for (_, path) in entries.into_iter().take(victims) {
            let _ = fs::remove_file(path);
        }
        Ok(victims)
    }

    /// Remove every entry in the namespace.
    pub fn clear_all(&self) -> Result<()> {
        for item in fs::read_dir(&self.dir).context("enumerate cache directory")? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }

    fn entry_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|items| {
                items
                    .filter_map(|item| item.ok())
                    .filter(|item| {
                        item.path().extension().and_then(|e| e.to_str()) == Some("json")
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CacheStore) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::at(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    fn payload(total: u64) -> CachePayload {
        CachePayload {
            results: Vec::new(),
            total_results: total,
            rewritten_terms: vec!["t2dm".into()],
            search_ms: 420,
        }
    }

    #[test]
    fn round_trip_within_ttl() {
        let (_dir, store) = store();
        let key = CacheStore::cache_key("diabetes", SearchType::Hybrid, true);
        store.save(&key, &payload(7)).unwrap();
        assert_eq!(store.load(&key), Some(payload(7)));
    }

    #[test]
    fn expired_entries_are_absent_and_purged() {
        let (_dir, store) = store();
        let key = CacheStore::cache_key("diabetes", SearchType::Hybrid, true);
        store.save(&key, &payload(7)).unwrap();

        // Age the entry past the TTL by rewriting its stored timestamp.
        let path = store.entry_path(&key);
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["timestamp"] =
            serde_json::json!(now_unix() - CACHE_TTL.as_secs() as i64 - 3600);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        assert_eq!(store.load(&key), None);
        assert!(!path.exists());
    }

    #[test]
    fn keys_differ_per_type_and_llm_flag() {
        let base = CacheStore::cache_key("diabetes", SearchType::Hybrid, true);
        assert_ne!(base, CacheStore::cache_key("diabetes", SearchType::Hybrid, false));
        assert_ne!(base, CacheStore::cache_key("diabetes", SearchType::Keyword, true));
    }

    #[test]
    fn separator_injection_cannot_collide_keys() {
        // A query embedding the separator must not forge another key.
        let forged = CacheStore::cache_key("diabetes:hybrid", SearchType::Keyword, true);
        let honest = CacheStore::cache_key("diabetes", SearchType::Hybrid, true);
        assert_ne!(forged, honest);
    }

    #[test]
    fn evict_oldest_half_keeps_newest() {
        let (_dir, store) = store();
        for i in 0..5u64 {
            let key = CacheStore::cache_key(&format!("q{i}"), SearchType::Keyword, false);
            store.save(&key, &payload(i)).unwrap();
            // Stagger timestamps so ordering is unambiguous.
            let path = store.entry_path(&key);
            let mut value: serde_json::Value =
                serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
            value["timestamp"] = serde_json::json!(1_700_000_000 + i as i64);
            fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        }

        assert_eq!(store.evict_oldest_half().unwrap(), 2);
        assert_eq!(store.entry_count(), 3);
        // The oldest two are gone; the newest three survive.
        for i in 0..2u64 {
            let key = CacheStore::cache_key(&format!("q{i}"), SearchType::Keyword, false);
            assert!(!store.entry_path(&key).exists());
        }
        for i in 2..5u64 {
            let key = CacheStore::cache_key(&format!("q{i}"), SearchType::Keyword, false);
            assert!(store.entry_path(&key).exists());
        }
    }

    #[test]
    fn save_at_capacity_evicts_and_drops_write() {
        let (_dir, mut store) = store();
        store.max_entries = 4;
        for i in 0..4u64 {
            let key = CacheStore::cache_key(&format!("q{i}"), SearchType::Keyword, false);
            store.save(&key, &payload(i)).unwrap();
        }

        let key = CacheStore::cache_key("overflow", SearchType::Keyword, false);
        assert!(store.save(&key, &payload(9)).is_err());
        // Bulk eviction ran, the rejected write was not applied.
        assert_eq!(store.entry_count(), 2);
        assert_eq!(store.load(&key), None);
    }

    #[test]
    fn clear_all_empties_the_namespace() {
        let (_dir, store) = store();
        for i in 0..3u64 {
            let key = CacheStore::cache_key(&format!("q{i}"), SearchType::Vector, false);
            store.save(&key, &payload(i)).unwrap();
        }
        store.clear_all().unwrap();
        assert_eq!(store.entry_count(), 0);
    }
}
