use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::AuthError;
use crate::oauth::record::CredentialRecord;

/// Persistence for the single credential record.
///
/// `load` never fails: a missing or unreadable record is reported as `None`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Option<CredentialRecord>;

    /// Replace the stored record wholesale.
    async fn save(&self, record: &CredentialRecord) -> Result<(), AuthError>;

    /// Remove the stored record. Removing nothing is not an error.
    async fn clear(&self) -> Result<(), AuthError>;
}

/// JSON file store with atomic replace and owner-only permissions.
///
/// Two processes writing at the same time are not coordinated; the last
/// rename wins.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Option<CredentialRecord> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "cannot read credential file: {e}");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "ignoring malformed credential file: {e}"
                );
                None
            }
        }
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        write_atomic(&self.path, record).await
    }

    async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "cleared credential file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write to an owner-only sibling temp file, fsync it, then rename over the
/// target so readers only ever see a complete record.
async fn write_atomic(path: &Path, record: &CredentialRecord) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(record).map_err(|e| {
        AuthError::Io(std::io::Error::other(format!(
            "Failed to serialize credential record: {e}"
        )))
    })?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials.json".to_string());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    // A leftover temp file from a crashed run may carry wider permissions.
    let _ = tokio::fs::remove_file(&tmp_path).await;
    if let Err(e) = write_private(&tmp_path, json.as_bytes()).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    tracing::debug!(path = %path.display(), "persisted credential record");
    Ok(())
}

/// Create `path` readable by the owner only and flush it to disk.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// In-process store, for tests and embedders that keep credentials elsewhere.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: Mutex<Option<CredentialRecord>>,
    writes: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CredentialRecord>> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Option<CredentialRecord> {
        self.slot().clone()
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        *self.slot() = Some(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        *self.slot() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::oauth::record::parse_scope;

    fn test_record() -> CredentialRecord {
        CredentialRecord {
            access_token: "at_1".into(),
            refresh_token: Some("rt_1".into()),
            expires_at: Utc.timestamp_millis_opt(1_735_500_000_000).unwrap(),
            scope: parse_scope("openid email"),
            token_type: "Bearer".into(),
        }
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("credentials.json"));

        store.save(&test_record()).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, test_record());
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nope.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn load_malformed_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileTokenStore::new(&path);
        assert!(store.load().await.is_none());

        std::fs::write(&path, r#"{"accessToken": "only-half"}"#).unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("credentials.json");
        let store = FileTokenStore::new(&path);
        store.save(&test_record()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn save_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("credentials.json"));
        store.save(&test_record()).await.unwrap();

        let mut second = test_record();
        second.access_token = "at_2".into();
        second.expires_at = second.expires_at + Duration::hours(1);
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap().access_token, "at_2");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_record_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("credentials.json"));
        store.save(&test_record()).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
        store.clear().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        FileTokenStore::new(&path).save(&test_record()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_world_readable_temp_file_is_not_reused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let stale = dir
            .path()
            .join(format!(".credentials.json.tmp.{}", std::process::id()));
        std::fs::write(&stale, "leftover").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        FileTokenStore::new(&path).save(&test_record()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
        assert!(!stale.exists());
        assert!(FileTokenStore::new(&path).load().await.is_some());
    }

    #[tokio::test]
    async fn memory_store_counts_writes() {
        let store = MemoryTokenStore::new();
        assert!(store.load().await.is_none());
        store.save(&test_record()).await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.load().await, Some(test_record()));
        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }
}
