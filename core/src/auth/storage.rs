use std::fmt::Debug;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;

pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Where the bearer credential is persisted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsStoreMode {
    /// `$ASTRA_HOME/credentials.json`.
    #[default]
    File,
    /// Process memory only; gone when the process exits.
    Ephemeral,
}

/// On-disk shape of `credentials.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CredentialsJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jwt_token: Option<String>,
}

/// Holds at most one bearer credential.
pub trait CredentialStore: Debug + Send + Sync {
    fn load(&self) -> std::io::Result<Option<String>>;

    /// Replaces any previously stored credential.
    fn save(&self, token: &str) -> std::io::Result<()>;

    /// Returns whether something was removed.
    fn delete(&self) -> std::io::Result<bool>;
}

#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    astra_home: PathBuf,
}

impl FileCredentialStore {
    pub fn new(astra_home: PathBuf) -> Self {
        Self { astra_home }
    }

    fn credentials_file(&self) -> PathBuf {
        self.astra_home.join(CREDENTIALS_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> std::io::Result<Option<String>> {
        let mut file = match File::open(self.credentials_file()) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let parsed: CredentialsJson = serde_json::from_str(&contents)?;
        Ok(parsed.jwt_token.filter(|token| !token.is_empty()))
    }

    fn save(&self, token: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.astra_home)?;
        let json = serde_json::to_string_pretty(&CredentialsJson {
            jwt_token: Some(token.to_string()),
        })?;
        let mut options = OpenOptions::new();
        options.truncate(true).write(true).create(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(self.credentials_file())?;
        file.write_all(json.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn delete(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(self.credentials_file()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Default)]
pub struct EphemeralCredentialStore {
    token: Mutex<Option<String>>,
}

impl EphemeralCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for EphemeralCredentialStore {
    fn load(&self) -> std::io::Result<Option<String>> {
        Ok(self.slot().clone())
    }

    fn save(&self, token: &str) -> std::io::Result<()> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn delete(&self) -> std::io::Result<bool> {
        Ok(self.slot().take().is_some())
    }
}

pub fn create_credential_store(
    astra_home: &Path,
    mode: CredentialsStoreMode,
) -> Arc<dyn CredentialStore> {
    match mode {
        CredentialsStoreMode::File => Arc::new(FileCredentialStore::new(astra_home.to_path_buf())),
        CredentialsStoreMode::Ephemeral => Arc::new(EphemeralCredentialStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn file_store_round_trips_and_overwrites() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FileCredentialStore::new(dir.path().to_path_buf());

        assert_eq!(store.load()?, None);
        store.save("first.token.sig")?;
        store.save("second.token.sig")?;
        assert_eq!(store.load()?, Some("second.token.sig".to_string()));

        let raw = std::fs::read_to_string(dir.path().join(CREDENTIALS_FILE))?;
        let json: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(json, serde_json::json!({ "jwt_token": "second.token.sig" }));
        Ok(())
    }

    #[test]
    fn file_store_delete_reports_whether_anything_was_removed() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FileCredentialStore::new(dir.path().to_path_buf());

        assert!(!store.delete()?);
        store.save("a.b.c")?;
        assert!(store.delete()?);
        assert_eq!(store.load()?, None);
        assert!(!dir.path().join(CREDENTIALS_FILE).exists());
        Ok(())
    }

    #[test]
    fn empty_stored_token_is_absent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(CREDENTIALS_FILE), r#"{"jwt_token":""}"#)?;
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn file_store_creates_missing_home() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let home = dir.path().join("nested").join("home");
        let store = FileCredentialStore::new(home.clone());
        store.save("a.b.c")?;
        assert!(home.join(CREDENTIALS_FILE).exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn credentials_file_is_owner_only() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        store.save("a.b.c")?;
        let mode = std::fs::metadata(dir.path().join(CREDENTIALS_FILE))?
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn ephemeral_store_never_touches_disk() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = create_credential_store(dir.path(), CredentialsStoreMode::Ephemeral);

        store.save("a.b.c")?;
        assert_eq!(store.load()?, Some("a.b.c".to_string()));
        assert!(!dir.path().join(CREDENTIALS_FILE).exists());
        assert!(store.delete()?);
        assert_eq!(store.load()?, None);
        Ok(())
    }
}
