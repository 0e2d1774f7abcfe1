use std::{
    collections::BTreeMap,
    fs, io,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

pub const SESSION_KEY: &str = "session_id";

/// Which top-level view the host should be showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    Dashboard,
}

/// Flat key/value store persisted as a JSON object, cleared as a whole.
#[derive(Debug, Default)]
pub struct ClientStorage {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl ClientStorage {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from disk. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse client storage at {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read client storage at {}", path.display()));
            }
        };

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Store `value` and persist. On a failed write the previous value is put
    /// back, so memory never holds what the file does not.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> io::Result<()> {
        let key = key.into();
        let previous = self.entries.insert(key.clone(), value.into());
        if let Err(err) = self.flush() {
            match previous {
                Some(previous) => self.entries.insert(key, previous),
                None => self.entries.remove(&key),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn clear(&mut self) -> io::Result<()> {
        self.entries.clear();
        match &self.path {
            Some(path) => match fs::remove_file(path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.entries).map_err(io::Error::other)?;
        fs::write(path, raw)
    }
}

/// Process-wide session state shared by the request gate and the dashboard.
///
/// Created once at start-up from the persisted storage; the token lives under
/// [`SESSION_KEY`]. Clearing wipes the whole storage and flips the view to
/// [`View::Login`].
pub struct SessionContext {
    storage: RwLock<ClientStorage>,
    view: watch::Sender<View>,
}

impl SessionContext {
    pub fn init(storage: ClientStorage) -> Self {
        let initial = if storage.get(SESSION_KEY).is_some_and(|token| !token.is_empty()) {
            View::Dashboard
        } else {
            View::Login
        };
        let (view, _) = watch::channel(initial);

        Self {
            storage: RwLock::new(storage),
            view,
        }
    }

    pub fn token(&self) -> Option<String> {
        let guard = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(SESSION_KEY)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn establish(&self, token: &str) -> io::Result<()> {
        {
            let mut guard = self.storage.write().unwrap_or_else(PoisonError::into_inner);
            guard.set(SESSION_KEY, token)?;
        }
        self.view.send_replace(View::Dashboard);
        info!("session established");
        Ok(())
    }

    /// Drop every stored value and signal navigation to the login view.
    pub fn clear(&self) {
        {
            let mut guard = self.storage.write().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = guard.clear() {
                warn!(?err, "failed to remove persisted client storage");
            }
        }
        self.view.send_replace(View::Login);
        info!("session cleared");
    }

    pub fn current_view(&self) -> View {
        *self.view.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.view.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_storage_file_loads_empty() {
        let dir = tempdir().expect("temp dir");
        let storage = ClientStorage::load(dir.path().join("storage.json")).expect("load");
        assert!(storage.is_empty());
    }

    #[test]
    fn token_survives_reload() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("storage.json");

        let session = SessionContext::init(ClientStorage::load(&path).expect("load"));
        assert_eq!(session.current_view(), View::Login);
        session.establish("abc123").expect("establish");

        let reloaded = SessionContext::init(ClientStorage::load(&path).expect("reload"));
        assert_eq!(reloaded.token().as_deref(), Some("abc123"));
        assert_eq!(reloaded.current_view(), View::Dashboard);
    }

    #[test]
    fn clear_removes_file_and_signals_login() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("storage.json");

        let session = SessionContext::init(ClientStorage::load(&path).expect("load"));
        session.establish("abc123").expect("establish");
        let mut rx = session.subscribe();
        assert!(path.exists());

        session.clear();

        assert!(!path.exists());
        assert!(session.token().is_none());
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), View::Login);
    }

    #[test]
    fn failed_write_keeps_session_unauthenticated() {
        let dir = tempdir().expect("temp dir");
        let blocked = dir.path().join("sub");
        let session = SessionContext::init(
            ClientStorage::load(blocked.join("storage.json")).expect("load"),
        );
        fs::write(&blocked, b"not a directory").expect("block parent");

        assert!(session.establish("tok").is_err());

        assert!(session.token().is_none());
        assert!(!session.is_authenticated());
        assert_eq!(session.current_view(), View::Login);
    }

    #[test]
    fn failed_write_restores_previous_value() {
        let dir = tempdir().expect("temp dir");
        let blocked = dir.path().join("sub");
        let mut storage = ClientStorage::load(blocked.join("storage.json")).expect("load");
        storage.set(SESSION_KEY, "old").expect("first write");
        fs::remove_dir_all(&blocked).expect("remove dir");
        fs::write(&blocked, b"not a directory").expect("block parent");

        assert!(storage.set(SESSION_KEY, "new").is_err());

        assert_eq!(storage.get(SESSION_KEY), Some("old"));
    }

    #[test]
    fn empty_token_counts_as_unauthenticated() {
        let mut storage = ClientStorage::in_memory();
        storage.set(SESSION_KEY, "").expect("set");
        let session = SessionContext::init(storage);
        assert!(!session.is_authenticated());
    }
}
