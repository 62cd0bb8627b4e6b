//! Persistent identity-token cache.
//!
//! One JSON document maps account → device type → `{token, expires}`. Every read-modify-
//! write cycle runs under one async mutex shared by all clones of the handle, so two
//! sessions saving for different devices never lose each other's update. Expired records
//! are pruned on every load and save.

use crate::auth::device::DeviceDescriptor;
use crate::error::{RelayError, Result};
use crate::utils::time::unix_now;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Provider-issued bearer token with its expiry in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    pub token: String,
    #[serde(rename = "expires")]
    pub expires_at: i64,
}

impl IdentityToken {
    pub fn new(token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}

/// On-disk layout: account id → device type → token.
pub type CacheDocument = BTreeMap<String, BTreeMap<String, IdentityToken>>;

/// Drop expired records and accounts left empty. Returns the number of tokens removed.
pub fn prune_expired(document: &mut CacheDocument, now: i64) -> usize {
    let mut removed = 0;
    document.retain(|_, devices| {
        let before = devices.len();
        devices.retain(|_, token| !token.is_expired_at(now));
        removed += before - devices.len();
        !devices.is_empty()
    });
    removed
}

/// Keep every account/device record that parses as a token. Returns the document and
/// the number of records dropped.
fn salvage_document(raw: Value) -> (CacheDocument, usize) {
    let mut document = CacheDocument::new();
    let mut dropped = 0;

    let Value::Object(accounts) = raw else {
        return (document, 1);
    };
    for (account, devices) in accounts {
        let Value::Object(devices) = devices else {
            dropped += 1;
            continue;
        };
        for (device, record) in devices {
            match serde_json::from_value::<IdentityToken>(record) {
                Ok(token) => {
                    document.entry(account.clone()).or_default().insert(device, token);
                }
                Err(e) => {
                    debug!(account, device, error = %e, "Malformed token cache record");
                    dropped += 1;
                }
            }
        }
    }
    (document, dropped)
}

#[derive(Debug)]
struct CacheInner {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Handle to the cache file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TokenCache {
    inner: Arc<CacheInner>,
}

impl TokenCache {
    /// Bind to `path`. The file is created on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub async fn load(&self, account: &str, device: &DeviceDescriptor) -> Option<IdentityToken> {
        self.load_at(account, device, unix_now()).await
    }

    pub async fn save(
        &self,
        account: &str,
        device: &DeviceDescriptor,
        token: &IdentityToken,
    ) -> Result<()> {
        self.save_at(account, device, token, unix_now()).await
    }

    /// Look a token up as of `now`. An expired record is removed from the file.
    pub async fn load_at(
        &self,
        account: &str,
        device: &DeviceDescriptor,
        now: i64,
    ) -> Option<IdentityToken> {
        let _guard = self.inner.lock.lock().await;

        let mut document = self.read_document().await;
        let removed = prune_expired(&mut document, now);
        if removed > 0 {
            debug!(removed, "Pruned expired identity tokens");
            if let Err(e) = self.write_document(&document).await {
                warn!(error = %e, path = %self.inner.path.display(), "Failed to rewrite token cache");
            }
        }

        let token = document
            .get(account)
            .and_then(|devices| devices.get(device.device_type))
            .cloned();
        trace!(account, device = device.device_type, hit = token.is_some(), "Token cache lookup");
        token
    }

    /// Store `token` as of `now`, pruning whatever else has expired.
    pub async fn save_at(
        &self,
        account: &str,
        device: &DeviceDescriptor,
        token: &IdentityToken,
        now: i64,
    ) -> Result<()> {
        let _guard = self.inner.lock.lock().await;

        let mut document = self.read_document().await;
        document
            .entry(account.to_string())
            .or_default()
            .insert(device.device_type.to_string(), token.clone());
        prune_expired(&mut document, now);

        self.write_document(&document).await?;
        debug!(account, device = device.device_type, "Identity token cached");
        Ok(())
    }

    /// Missing, unreadable and unparseable files read as an empty document. Malformed
/// records inside a valid document are dropped one by one.
    async fn read_document(&self) -> CacheDocument {
        let bytes = match tokio::fs::read(&self.inner.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return CacheDocument::new(),
            Err(e) => {
                warn!(error = %e, path = %self.inner.path.display(), "Token cache unreadable, treating as empty");
                return CacheDocument::new();
            }
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(raw) => {
                let (document, dropped) = salvage_document(raw);
                if dropped > 0 {
                    warn!(dropped, path = %self.inner.path.display(), "Dropped malformed token cache records");
                }
                document
            }
            Err(e) => {
                warn!(error = %e, path = %self.inner.path.display(), "Token cache corrupt, treating as empty");
                CacheDocument::new()
            }
        }
    }

    async fn write_document(&self, document: &CacheDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| RelayError::Custom(format!("Failed to encode token cache: {e}")))?;

        if let Some(parent) = self.inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write-then-rename so a crash never leaves a half-written document.
        let staging = self.inner.path.with_extension("tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.inner.path).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> TokenCache {
        TokenCache::open(dir.path().join("tokens.json"))
    }

    #[tokio::test]
    async fn test_roundtrip_before_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let token = IdentityToken::new("XBL3.0 x=1;abc", 1_000);

        cache.save_at("alice", &DeviceDescriptor::ANDROID, &token, 500).await.unwrap();
        let loaded = cache.load_at("alice", &DeviceDescriptor::ANDROID, 999).await;
        assert_eq!(loaded, Some(token));
    }

    #[tokio::test]
    async fn test_expired_load_removes_record() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let token = IdentityToken::new("XBL3.0 x=1;abc", 1_000);
        cache.save_at("alice", &DeviceDescriptor::ANDROID, &token, 500).await.unwrap();

        assert_eq!(cache.load_at("alice", &DeviceDescriptor::ANDROID, 1_000).await, None);

        let raw = std::fs::read(cache.path()).unwrap();
        let document: CacheDocument = serde_json::from_slice(&raw).unwrap();
        assert!(document.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(cache.path(), b"{ not json").unwrap();

        assert_eq!(cache.load_at("alice", &DeviceDescriptor::IOS, 0).await, None);

        let token = IdentityToken::new("t", 10);
        cache.save_at("alice", &DeviceDescriptor::IOS, &token, 0).await.unwrap();
        assert_eq!(cache.load_at("alice", &DeviceDescriptor::IOS, 5).await, Some(token));
    }

    #[tokio::test]
    async fn test_malformed_record_keeps_other_accounts() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        std::fs::write(
            cache.path(),
            br#"{"alice":{"Android":{"token":"good","expires":100}},"bob":{"iOS":{"expires":100}},"dave":7}"#,
        )
        .unwrap();

        let alice = IdentityToken::new("good", 100);
        assert_eq!(cache.load_at("alice", &DeviceDescriptor::ANDROID, 1).await, Some(alice.clone()));
        assert_eq!(cache.load_at("bob", &DeviceDescriptor::IOS, 1).await, None);

        let carol = IdentityToken::new("fresh", 100);
        cache.save_at("carol", &DeviceDescriptor::IOS, &carol, 1).await.unwrap();

        assert_eq!(cache.load_at("alice", &DeviceDescriptor::ANDROID, 2).await, Some(alice));
        assert_eq!(cache.load_at("carol", &DeviceDescriptor::IOS, 2).await, Some(carol));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(cache.path()).unwrap()).unwrap();
        assert!(raw.get("bob").is_none());
        assert!(raw.get("dave").is_none());
    }

    #[test]
    fn test_salvage_non_object_root() {
        let (document, dropped) = salvage_document(serde_json::json!([1, 2]));
        assert!(document.is_empty());
        assert_eq!(dropped, 1);
    }

    #[tokio::test]
    async fn test_document_layout() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache
            .save_at("bob", &DeviceDescriptor::NINTENDO, &IdentityToken::new("t", 42), 0)
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["bob"]["Nintendo"]["token"], "t");
        assert_eq!(raw["bob"]["Nintendo"]["expires"], 42);
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_both_devices() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let mut handles = Vec::new();
        for device in DeviceDescriptor::ALL {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let token = IdentityToken::new(device.device_type, 100);
                cache.save_at("carol", &device, &token, 0).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for device in DeviceDescriptor::ALL {
            let token = cache.load_at("carol", &device, 1).await.unwrap();
            assert_eq!(token.token, device.device_type);
        }
    }

    #[test]
    fn test_prune_counts_removed() {
        let mut document = CacheDocument::new();
        let devices = document.entry("a".into()).or_default();
        devices.insert("Android".into(), IdentityToken::new("x", 5));
        devices.insert("iOS".into(), IdentityToken::new("y", 50));
        document
            .entry("b".into())
            .or_default()
            .insert("Android".into(), IdentityToken::new("z", 1));

        assert_eq!(prune_expired(&mut document, 10), 2);
        assert_eq!(document.len(), 1);
        assert!(document["a"].contains_key("iOS"));
    }
}
