//! Runtime settings (C1)
//!
//! Typed key/value settings persisted in the `configs` table as JSON-encoded
//! values, fronted by a write-through cache. Writes fire registered change
//! hooks so dependents (the Sonarr health prober) can react.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::models::LanguagePreference;
use crate::db::Store;

pub const SONARR_URL: &str = "sonarr_url";
pub const SONARR_TOKEN: &str = "sonarr_token";
pub const SONARR_FILTER_ANIME_ONLY: &str = "sonarr_filter_anime_only";
pub const SONARR_AUTO_RENAME: &str = "sonarr_auto_rename";
pub const SONARR_TAGS_MODE: &str = "sonarr_tags_mode";
pub const SONARR_TAGS: &str = "sonarr_tags";
pub const ANIMEWORLD_BASE_URL: &str = "animeworld_base_url";
pub const PREFERRED_LANGUAGE: &str = "preferred_language";
pub const DOWNLOAD_MAX_WORKERS: &str = "download_max_workers";
pub const CONCURRENT_DOWNLOADS: &str = "concurrent_downloads";
pub const FETCHWANTED_INTERVAL: &str = "fetchwanted_interval";
pub const UPDATEMETADATA_INTERVAL: &str = "updatemetadata_interval";

pub const DEFAULT_ANIMEWORLD_URL: &str = "https://www.animeworld.ac";

/// Inclusion policy for the configured Sonarr tag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagsMode {
    Blacklist,
    Whitelist,
}

/// One entry of the `sonarr_tags` setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEntry {
    pub value: i64,
    pub label: String,
}

/// Recognized keys with their seeded defaults.
fn defaults() -> Vec<(&'static str, Value)> {
    vec![
        (SONARR_URL, Value::Null),
        (SONARR_TOKEN, Value::Null),
        (SONARR_FILTER_ANIME_ONLY, json!(true)),
        (SONARR_AUTO_RENAME, json!(true)),
        (SONARR_TAGS_MODE, json!("blacklist")),
        (SONARR_TAGS, json!([])),
        (ANIMEWORLD_BASE_URL, json!(DEFAULT_ANIMEWORLD_URL)),
        (PREFERRED_LANGUAGE, json!("sub")),
        (DOWNLOAD_MAX_WORKERS, json!(3)),
        (CONCURRENT_DOWNLOADS, json!(2)),
        (FETCHWANTED_INTERVAL, json!(30)),
        (UPDATEMETADATA_INTERVAL, json!(120)),
    ]
}

type ChangeHook = Box<dyn Fn(&str) + Send + Sync>;

pub struct Settings {
    store: Arc<Store>,
    cache: RwLock<HashMap<String, Value>>,
    hooks: RwLock<Vec<ChangeHook>>,
}

impl Settings {
    pub fn new(store: Arc<Store>) -> Self {
        let settings = Self {
            store,
            cache: RwLock::new(HashMap::new()),
            hooks: RwLock::new(Vec::new()),
        };
        settings.seed_defaults();
        settings
    }

    fn seed_defaults(&self) {
        for (key, value) in defaults() {
            if let Err(e) = self.store.seed_config(key, &value.to_string()) {
                tracing::warn!("Failed to seed setting '{}': {}", key, e);
            }
        }
    }

    /// Register a hook fired with the key name after every successful write.
    pub fn on_change(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.hooks.write().unwrap().push(Box::new(hook));
    }

    fn raw(&self, key: &str) -> Value {
        if let Some(v) = self.cache.read().unwrap().get(key) {
            return v.clone();
        }
        let value = match self.store.get_config(key) {
            Ok(Some(text)) => serde_json::from_str(&text).unwrap_or(Value::Null),
            Ok(None) => defaults()
                .into_iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v)
                .unwrap_or(Value::Null),
            Err(e) => {
                tracing::warn!("Failed to read setting '{}': {}", key, e);
                Value::Null
            }
        };
        self.cache
            .write()
            .unwrap()
            .insert(key.to_string(), value.clone());
        value
    }

    /// Typed read. Returns `None` for null, missing, or mistyped values.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.raw(key);
        if value.is_null() {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Write a value, update the cache, and fire change hooks.
    pub fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.store.set_config(key, &value.to_string())?;
        self.cache.write().unwrap().insert(key.to_string(), value);
        for hook in self.hooks.read().unwrap().iter() {
            hook(key);
        }
        Ok(())
    }

    /// All persisted settings as a key → value map.
    pub fn list(&self) -> HashMap<String, Value> {
        let mut map: HashMap<String, Value> = defaults()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        match self.store.list_configs() {
            Ok(rows) => {
                for (key, text) in rows {
                    let value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    map.insert(key, value);
                }
            }
            Err(e) => tracing::warn!("Failed to list settings: {}", e),
        }
        map
    }

    // ============================================================================
    // Typed accessors
    // ============================================================================

    /// Sonarr base URL with trailing slashes stripped.
    pub fn sonarr_url(&self) -> Option<String> {
        self.get::<String>(SONARR_URL)
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
    }

    pub fn sonarr_token(&self) -> Option<String> {
        self.get::<String>(SONARR_TOKEN).filter(|t| !t.is_empty())
    }

    pub fn anime_only(&self) -> bool {
        self.get(SONARR_FILTER_ANIME_ONLY).unwrap_or(true)
    }

    pub fn auto_rename(&self) -> bool {
        self.get(SONARR_AUTO_RENAME).unwrap_or(true)
    }

    pub fn tags_mode(&self) -> TagsMode {
        self.get(SONARR_TAGS_MODE).unwrap_or(TagsMode::Blacklist)
    }

    pub fn tags(&self) -> Vec<TagEntry> {
        self.get(SONARR_TAGS).unwrap_or_default()
    }

    pub fn animeworld_base_url(&self) -> String {
        self.get::<String>(ANIMEWORLD_BASE_URL)
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_ANIMEWORLD_URL.to_string())
    }

    pub fn preferred_language(&self) -> LanguagePreference {
        self.get::<String>(PREFERRED_LANGUAGE)
            .map(|s| LanguagePreference::parse(&s))
            .unwrap_or(LanguagePreference::Sub)
    }

    pub fn download_max_workers(&self) -> usize {
        self.get::<i64>(DOWNLOAD_MAX_WORKERS)
            .unwrap_or(3)
            .clamp(1, 10) as usize
    }

    pub fn concurrent_downloads(&self) -> usize {
        self.get::<i64>(CONCURRENT_DOWNLOADS)
            .unwrap_or(2)
            .clamp(1, 10) as usize
    }

    /// Interval of the `fetch_wanted` task in minutes.
    pub fn fetch_wanted_interval(&self) -> u64 {
        self.get::<i64>(FETCHWANTED_INTERVAL).unwrap_or(30).max(1) as u64
    }

    /// Interval of the `update_metadata` task in minutes.
    pub fn update_metadata_interval(&self) -> u64 {
        self.get::<i64>(UPDATEMETADATA_INTERVAL).unwrap_or(120).max(1) as u64
    }

    /// Decide whether a series with the given tag ids passes the tag policy.
    pub fn tags_allow(&self, series_tags: &[i64]) -> bool {
        let configured: Vec<i64> = self.tags().iter().map(|t| t.value).collect();
        if configured.is_empty() {
            return true;
        }
        let overlaps = series_tags.iter().any(|t| configured.contains(t));
        match self.tags_mode() {
            TagsMode::Blacklist => !overlaps,
            TagsMode::Whitelist => overlaps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::new(Arc::new(Store::in_memory().unwrap()))
    }

    #[test]
    fn defaults_are_seeded() {
        let s = settings();
        assert_eq!(s.concurrent_downloads(), 2);
        assert_eq!(s.download_max_workers(), 3);
        assert_eq!(s.preferred_language(), LanguagePreference::Sub);
        assert!(s.anime_only());
        assert!(s.sonarr_url().is_none());
    }

    #[test]
    fn set_updates_cache_and_fires_hooks() {
        let s = settings();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        s.on_change(move |key| {
            if key == SONARR_URL {
                fired_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        s.set(SONARR_URL, json!("http://sonarr:8989/")).unwrap();
        assert_eq!(s.sonarr_url().unwrap(), "http://sonarr:8989");
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_counts_are_clamped() {
        let s = settings();
        s.set(DOWNLOAD_MAX_WORKERS, json!(99)).unwrap();
        assert_eq!(s.download_max_workers(), 10);
        s.set(CONCURRENT_DOWNLOADS, json!(0)).unwrap();
        assert_eq!(s.concurrent_downloads(), 1);
    }

    #[test]
    fn tag_policy() {
        let s = settings();
        s.set(
            SONARR_TAGS,
            json!([{"value": 3, "label": "anime"}, {"value": 7, "label": "skip"}]),
        )
        .unwrap();

        // Blacklist: tagged series are excluded.
        assert!(!s.tags_allow(&[7]));
        assert!(s.tags_allow(&[1]));

        s.set(SONARR_TAGS_MODE, json!("whitelist")).unwrap();
        assert!(s.tags_allow(&[3]));
        assert!(!s.tags_allow(&[1]));
    }
}
