use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{AuthError, Result};
use crate::session::{AccountId, Session};
use crate::store::SessionStore;

/// Session fields as they appear in the launcher configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionRecord {
    session_username: String,
    session_uuid: String,
    session_access_token: String,
    session_refresh_token: String,
}

impl From<&Session> for SessionRecord {
    fn from(session: &Session) -> Self {
        Self {
            session_username: session.username.clone(),
            session_uuid: session.account_id.simple(),
            session_access_token: session.game_access_token.clone(),
            session_refresh_token: session.identity_refresh_token.clone(),
        }
    }
}

/// Session store backed by the launcher's JSON configuration file.
///
/// Only the four `session*` keys are owned by this store; every other key in
/// the file belongs to the host application and is written back untouched.
///
/// ```text
/// ~/.config/blocklaunch/
/// ├── config.json   # launcher configuration, session fields at top level
/// └── config.lock   # advisory lock held while writing
/// ```
#[derive(Debug)]
pub struct ConfigFileSessionStore {
    config_path: PathBuf,
    lock_file: PathBuf,
    /// Serializes writers inside this process; the lock file covers the rest
    write_lock: Mutex<()>,
}

impl ConfigFileSessionStore {
    /// Create a store for the given configuration file
    pub async fn new(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let lock_file = config_path.with_extension("lock");

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            config_path,
            lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Get default configuration file for the current platform
    pub fn default_config_path() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "blocklaunch").ok_or_else(|| {
            AuthError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Acquire an exclusive lock on the configuration file
    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| AuthError::LockTimeout)?;

        Ok(lock_file)
    }

    /// Read the whole configuration object. A missing file is an empty object;
    /// unparseable content is reported as `None`.
    async fn read_config(&self) -> Result<Option<Map<String, Value>>> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(Map::new())),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) | Err(_) => Ok(None),
        }
    }

    /// Merge the session fields into the configuration and replace the file
    async fn write_record(&self, record: &SessionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.acquire_lock()?;

        let mut config = match self.read_config().await? {
            Some(config) => config,
            None => {
                warn!(
                    "Configuration file {} is corrupt, rewriting it",
                    self.config_path.display()
                );
                Map::new()
            }
        };

        if let Value::Object(fields) = serde_json::to_value(record)? {
            config.extend(fields);
        }

        let json = serde_json::to_string_pretty(&Value::Object(config))?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.config_path.with_extension("tmp");
        let mut file = create_private(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.config_path).await?;
        Ok(())
    }
}

/// Create `path` fresh, readable by the owner only (Unix) before any byte is
/// written. A leftover file from an interrupted write is replaced.
async fn create_private(path: &Path) -> Result<fs::File> {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    Ok(options.open(path).await?)
}

#[async_trait::async_trait]
impl SessionStore for ConfigFileSessionStore {
    async fn load(&self) -> Option<Session> {
        let config = match self.read_config().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!(
                    "Configuration file {} is corrupt, ignoring saved session",
                    self.config_path.display()
                );
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to read {}: {}", self.config_path.display(), e);
                return None;
            }
        };

        let record: SessionRecord = match serde_json::from_value(Value::Object(config)) {
            Ok(record) => record,
            Err(e) => {
                warn!("Saved session fields are malformed: {}", e);
                return None;
            }
        };

        if record.session_refresh_token.is_empty() {
            debug!("No saved session");
            return None;
        }

        let Some(account_id) = AccountId::parse(&record.session_uuid) else {
            warn!("Saved session has an invalid account id, ignoring it");
            return None;
        };

        Some(Session {
            username: record.session_username,
            account_id,
            game_access_token: record.session_access_token,
            identity_refresh_token: record.session_refresh_token,
        })
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.write_record(&SessionRecord::from(session)).await?;
        info!("Session saved for user: {}", session.username);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.write_record(&SessionRecord::default()).await?;
        info!("Session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    async fn create_test_store() -> (ConfigFileSessionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigFileSessionStore::new(temp_dir.path().join("config.json"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    fn session(name: &str, refresh: &str) -> Session {
        Session {
            username: name.to_string(),
            account_id: AccountId::parse("069a79f444e94726a5befca90e38aaf5").unwrap(),
            game_access_token: format!("mc-{name}"),
            identity_refresh_token: refresh.to_string(),
        }
    }

    async fn read_json(store: &ConfigFileSessionStore) -> Value {
        let content = fs::read_to_string(store.path()).await.unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store().await;

        store.save(&session("TestPlayer", "rt-1")).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, session("TestPlayer", "rt-1"));
        assert!(store.has_valid().await);

        let json = read_json(&store).await;
        assert_eq!(json["sessionUsername"], "TestPlayer");
        assert_eq!(json["sessionUuid"], "069a79f444e94726a5befca90e38aaf5");
        assert_eq!(json["sessionAccessToken"], "mc-TestPlayer");
        assert_eq!(json["sessionRefreshToken"], "rt-1");
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp) = create_test_store().await;

        store.save(&session("TestPlayer", "rt-1")).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.load().await.is_none());
        assert!(!store.has_valid().await);

        let json = read_json(&store).await;
        assert_eq!(json["sessionUsername"], "");
        assert_eq!(json["sessionRefreshToken"], "");
    }

    #[tokio::test]
    async fn test_missing_file_is_no_session() {
        let (store, _temp) = create_test_store().await;
        assert!(store.load().await.is_none());
        assert!(!store.has_valid().await);
    }

    #[tokio::test]
    async fn test_host_fields_survive() {
        let (store, _temp) = create_test_store().await;
        fs::write(
            store.path(),
            r#"{"javaPath": "/usr/bin/java", "memoryMax": 4096, "mods": {"autoLoad": true}}"#,
        )
        .await
        .unwrap();

        store.save(&session("TestPlayer", "rt-1")).await.unwrap();
        store.clear().await.unwrap();

        let json = read_json(&store).await;
        assert_eq!(json["javaPath"], "/usr/bin/java");
        assert_eq!(json["memoryMax"], 4096);
        assert_eq!(json["mods"]["autoLoad"], true);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_absence() {
        let (store, _temp) = create_test_store().await;
        fs::write(store.path(), "{ not json").await.unwrap();

        assert!(store.load().await.is_none());

        store.save(&session("TestPlayer", "rt-1")).await.unwrap();
        assert_eq!(store.load().await, Some(session("TestPlayer", "rt-1")));
    }

    #[tokio::test]
    async fn test_malformed_fields_are_absence() {
        let (store, _temp) = create_test_store().await;
        fs::write(
            store.path(),
            r#"{"sessionUsername": 7, "sessionRefreshToken": "rt"}"#,
        )
        .await
        .unwrap();
        assert!(store.load().await.is_none());

        fs::write(
            store.path(),
            r#"{"sessionUsername": "A", "sessionUuid": "nope", "sessionRefreshToken": "rt"}"#,
        )
        .await
        .unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_hyphenated_uuid_loads() {
        let (store, _temp) = create_test_store().await;
        fs::write(
            store.path(),
            r#"{
                "sessionUsername": "TestPlayer",
                "sessionUuid": "069a79f4-44e9-4726-a5be-fca90e38aaf5",
                "sessionAccessToken": "mc-TestPlayer",
                "sessionRefreshToken": "rt-1"
            }"#,
        )
        .await
        .unwrap();

        assert_eq!(store.load().await, Some(session("TestPlayer", "rt-1")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (store, temp) = create_test_store().await;
        let stale = temp.path().join("config.tmp");
        fs::write(&stale, "leftover").await.unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(store.path(), r#"{"javaPath": "/usr/bin/java"}"#)
            .await
            .unwrap();
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&session("TestPlayer", "rt-1")).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!stale.exists());
        assert_eq!(read_json(&store).await["javaPath"], "/usr/bin/java");
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_not_torn() {
        let (store, _temp) = create_test_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    store.save(&session(&format!("Player{i}"), &format!("rt-{i}"))).await
                } else {
                    store.clear().await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let json = read_json(&store).await;
        let username = json["sessionUsername"].as_str().unwrap().to_string();
        let refresh = json["sessionRefreshToken"].as_str().unwrap().to_string();
        if username.is_empty() {
            assert_eq!(refresh, "");
        } else {
            let suffix = username.trim_start_matches("Player");
            assert_eq!(refresh, format!("rt-{suffix}"));
            assert_eq!(json["sessionAccessToken"], format!("mc-{username}"));
        }
    }
}
