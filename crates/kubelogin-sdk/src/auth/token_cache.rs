//! File-backed token cache
//!
//! One JSON file per request fingerprint. Writes go to a temporary file in
//! the cache directory which is then renamed over the target, so readers in
//! other processes see either the old or the new record, never a partial
//! one.

use super::types::{LoginRequest, TokenSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Version tag written into every record; other versions are ignored
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Token cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to persist cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Cache key derived from issuer, client ID and scope set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheFingerprint(String);

#[derive(Serialize)]
struct FingerprintInput<'a> {
    issuer: &'a str,
    client_id: &'a str,
    scopes: Vec<&'a str>,
}

impl CacheFingerprint {
    /// Hash the parameters; scope order and duplicates do not matter
    pub fn new(issuer: &str, client_id: &str, scopes: &[String]) -> Self {
        let mut scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes.dedup();

        let input = FingerprintInput {
            issuer,
            client_id,
            scopes,
        };
        // Serializing a struct of strings cannot fail
        let encoded = serde_json::to_vec(&input).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&encoded)))
    }

    pub fn for_request(request: &LoginRequest) -> Self {
        Self::new(&request.issuer_url, &request.client_id, &request.scopes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record stored in a cache file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub version: u32,
    pub fingerprint: String,
    pub token_set: TokenSet,
    pub cached_at: DateTime<Utc>,
}

/// Token cache rooted at a directory
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fingerprint: &CacheFingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint.as_str()))
    }

    /// Load the record for `fingerprint`
    ///
    /// Missing, unreadable or incompatible files are a miss. Expiry is left
    /// to the caller since an expired record may still carry a usable
    /// refresh token.
    pub async fn get(
        &self,
        fingerprint: &CacheFingerprint,
    ) -> Result<Option<CachedRecord>, CacheError> {
        let path = self.path_for(fingerprint);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: CachedRecord = match serde_json::from_slice(&content) {
            Ok(record) => record,
            Err(e) => {
                debug!("Ignoring unreadable cache file {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        if record.version != CACHE_FORMAT_VERSION || record.fingerprint != fingerprint.as_str() {
            debug!(
                "Ignoring incompatible cache record {} (version {})",
                path.display(),
                record.version
            );
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Store `token_set` under `fingerprint`, replacing any previous record
    pub async fn put(
        &self,
        fingerprint: &CacheFingerprint,
        token_set: &TokenSet,
    ) -> Result<(), CacheError> {
        let record = CachedRecord {
            version: CACHE_FORMAT_VERSION,
            fingerprint: fingerprint.as_str().to_string(),
            token_set: token_set.clone(),
            cached_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&record)?;
        let dir = self.dir.clone();
        let path = self.path_for(fingerprint);

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &content)).await??;
        debug!("Stored token cache record {}", fingerprint);
        Ok(())
    }

    /// Remove the record for `fingerprint` if present
    pub async fn invalidate(&self, fingerprint: &CacheFingerprint) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.path_for(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<(), CacheError> {
    // Only missing levels are created (0700); an existing directory keeps its mode
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;

    // NamedTempFile is created with mode 0600 on unix
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token_set() -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            id_token: "id".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            issued_at: Utc::now(),
        }
    }

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fingerprint_ignores_scope_order_and_duplicates() {
        let a = CacheFingerprint::new("https://issuer", "client", &scopes(&["openid", "email"]));
        let b = CacheFingerprint::new(
            "https://issuer",
            "client",
            &scopes(&["email", "openid", "email"]),
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_every_parameter() {
        let base = CacheFingerprint::new("https://issuer", "client", &scopes(&["openid"]));
        assert_ne!(
            base,
            CacheFingerprint::new("https://other", "client", &scopes(&["openid"]))
        );
        assert_ne!(
            base,
            CacheFingerprint::new("https://issuer", "other", &scopes(&["openid"]))
        );
        assert_ne!(
            base,
            CacheFingerprint::new("https://issuer", "client", &scopes(&["openid", "email"]))
        );
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("oidc-login"));
        let fingerprint = CacheFingerprint::new("https://issuer", "client", &scopes(&["openid"]));

        assert!(cache.get(&fingerprint).await.unwrap().is_none());

        let tokens = token_set();
        cache.put(&fingerprint, &tokens).await.unwrap();
        let record = cache.get(&fingerprint).await.unwrap().unwrap();
        assert_eq!(record.token_set, tokens);
        assert_eq!(record.version, CACHE_FORMAT_VERSION);

        cache.invalidate(&fingerprint).await.unwrap();
        assert!(cache.get(&fingerprint).await.unwrap().is_none());
        cache.invalidate(&fingerprint).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("oidc-login"));
        let fingerprint = CacheFingerprint::new("https://issuer", "client", &scopes(&["openid"]));
        cache.put(&fingerprint, &token_set()).await.unwrap();

        let file_mode = std::fs::metadata(cache.path_for(&fingerprint))
            .unwrap()
            .permissions()
            .mode();
        let dir_mode = std::fs::metadata(cache.dir()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_directory_mode_is_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        let cache = TokenCache::new(dir.path());
        let fingerprint = CacheFingerprint::new("https://issuer", "client", &scopes(&["openid"]));
        cache.put(&fingerprint, &token_set()).await.unwrap();

        let dir_mode = std::fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o755);
        assert!(cache.get(&fingerprint).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_and_incompatible_records_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path());
        let fingerprint = CacheFingerprint::new("https://issuer", "client", &scopes(&["openid"]));

        std::fs::write(cache.path_for(&fingerprint), b"{not json").unwrap();
        assert!(cache.get(&fingerprint).await.unwrap().is_none());

        let record = CachedRecord {
            version: CACHE_FORMAT_VERSION + 1,
            fingerprint: fingerprint.as_str().to_string(),
            token_set: token_set(),
            cached_at: Utc::now(),
        };
        std::fs::write(
            cache.path_for(&fingerprint),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
        assert!(cache.get(&fingerprint).await.unwrap().is_none());
    }
}
