//! Cache generations and the process-wide cache storage.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use shellcache_net::Response;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::ServiceWorkerError;

/// Snapshot format written by [`CacheStorage::save`].
const SNAPSHOT_FORMAT: u32 = 2;

/// Cache storage shared between the gateway and its host.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

/// Key under which a request URL is stored: the full URL, query included,
/// without the fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

// ==================== Entry ====================

/// A captured response, keyed by its request URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (fragment stripped).
    pub url: Url,

    /// Response status.
    #[serde(with = "status_code")]
    pub status: StatusCode,

    /// Response headers in arrival order, values as raw bytes.
    #[serde(with = "header_pairs")]
    pub headers: Vec<(String, Bytes)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for the given request URL.
    ///
    /// The body is shared with `response`, not copied.
    pub fn from_response(request_url: &Url, response: &Response) -> Self {
        let mut url = request_url.clone();
        url.set_fragment(None);

        let headers = response
            .headers
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), Bytes::copy_from_slice(value.as_bytes()))
            })
            .collect();

        Self {
            url,
            status: response.status,
            headers,
            body: response.body().clone(),
            cached_at: now_millis(),
        }
    }

    /// Storage key for this entry.
    pub fn key(&self) -> String {
        self.url.to_string()
    }

    /// Size charged against the storage quota.
    pub fn size_bytes(&self) -> u64 {
        self.body.len() as u64
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                headers.append(n, v);
            }
        }
        Response::new(self.url.clone(), self.status, headers, self.body.clone()).cached()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod status_code {
    use http::StatusCode;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(d)?;
        StatusCode::from_u16(code).map_err(de::Error::custom)
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}

mod header_pairs {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(headers: &[(String, Bytes)], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(headers.iter().map(|(name, value)| (name, STANDARD.encode(value))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(String, Bytes)>, D::Error> {
        Vec::<(String, String)>::deserialize(d)?
            .into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map(|value| (name, Bytes::from(value)))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

// ==================== Cache ====================

/// One cache generation.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    name: String,
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new, empty generation.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Generation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request URL exactly.
    pub fn match_request(&self, url: &Url) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(url))
    }

    /// Insert an entry, returning the one it replaced.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key(), entry)
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url)).is_some()
    }

    /// All keys (URLs), sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by this generation.
    pub fn size_bytes(&self) -> u64 {
        self.entries.values().map(CacheEntry::size_bytes).sum()
    }

    fn entry_size(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(0, CacheEntry::size_bytes)
    }
}

// ==================== Cache Storage ====================

#[derive(Serialize, Deserialize)]
struct StorageSnapshot {
    format: u32,
    generations: Vec<GenerationSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct GenerationSnapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

/// All cache generations, keyed by name.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    quota_bytes: Option<u64>,
}

impl CacheStorage {
    /// Create new cache storage without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage limited to `quota_bytes` of response bodies.
    pub fn with_quota(quota_bytes: Option<u64>) -> Self {
        Self {
            caches: HashMap::new(),
            quota_bytes,
        }
    }

    /// Wrap into a shareable handle.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Get a cache by name.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.caches.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Bytes held across every generation.
    pub fn total_bytes(&self) -> u64 {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    /// Insert one entry into the named generation, creating it if absent.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        self.put_all(name, vec![entry])
    }

    /// Insert a batch into the named generation.
    ///
    /// Either every entry is stored or none is.
    pub fn put_all(
        &mut self,
        name: &str,
        entries: Vec<CacheEntry>,
    ) -> Result<(), ServiceWorkerError> {
        self.check_quota(name, &entries)?;

        let cache = self.open(name);
        for entry in entries {
            debug!(generation = %name, url = %entry.url, "Cache put");
            cache.put(entry);
        }
        Ok(())
    }

    fn check_quota(&self, name: &str, entries: &[CacheEntry]) -> Result<(), ServiceWorkerError> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };

        // Later entries for the same key replace earlier ones.
        let mut batch: HashMap<String, u64> = HashMap::new();
        for entry in entries {
            batch.insert(entry.key(), entry.size_bytes());
        }

        let replaced: u64 = match self.caches.get(name) {
            Some(cache) => batch.keys().map(|key| cache.entry_size(key)).sum(),
            None => 0,
        };
        let added: u64 = batch.values().sum();
        let base = self.total_bytes() - replaced;

        if base + added > quota {
            return Err(ServiceWorkerError::QuotaExceeded {
                needed: added,
                available: quota.saturating_sub(base),
            });
        }
        Ok(())
    }

    /// Match a request across all generations.
    ///
    /// `preferred` is searched first, then the rest in name order.
    pub fn match_request(&self, url: &Url, preferred: Option<&str>) -> Option<&CacheEntry> {
        if let Some(entry) = preferred
            .and_then(|name| self.caches.get(name))
            .and_then(|cache| cache.match_request(url))
        {
            return Some(entry);
        }

        self.keys()
            .into_iter()
            .filter(|name| Some(*name) != preferred)
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(url))
    }

    /// Write a JSON snapshot of every generation to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), ServiceWorkerError> {
        let snapshot = StorageSnapshot {
            format: SNAPSHOT_FORMAT,
            generations: self
                .keys()
                .into_iter()
                .filter_map(|name| self.caches.get(name))
                .map(|cache| {
                    let mut entries: Vec<CacheEntry> = cache.entries.values().cloned().collect();
                    entries.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
                    GenerationSnapshot {
                        name: cache.name.clone(),
                        entries,
                    }
                })
                .collect(),
        };

        let data = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(path = %path.display(), generations = snapshot.generations.len(), "Cache storage saved");
        Ok(())
    }

    /// Load a snapshot written by [`CacheStorage::save`].
    pub async fn load(path: &Path, quota_bytes: Option<u64>) -> Result<Self, ServiceWorkerError> {
        let data = tokio::fs::read(path).await?;
        let snapshot: StorageSnapshot = serde_json::from_slice(&data)?;

        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(ServiceWorkerError::CacheError(format!(
                "unsupported snapshot format {} in {}",
                snapshot.format,
                path.display()
            )));
        }

        let mut storage = Self::with_quota(quota_bytes);
        for generation in snapshot.generations {
            let cache = storage.open(&generation.name);
            for entry in generation.entries {
                cache.put(entry);
            }
        }

        info!(path = %path.display(), generations = storage.caches.len(), "Cache storage loaded");
        Ok(storage)
    }

    /// Load a snapshot, or start empty if the file does not exist.
    pub async fn load_or_default(
        path: &Path,
        quota_bytes: Option<u64>,
    ) -> Result<Self, ServiceWorkerError> {
        match Self::load(path, quota_bytes).await {
            Err(ServiceWorkerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                Ok(Self::with_quota(quota_bytes))
            }
            other => other,
        }
    }
}
