//! Local session persistence.
//!
//! A login writes a small JSON file under `~/.reqmgr` so later commands
//! can skip re-authentication until the session expires. The file is a
//! convenience token, not a security boundary; it is still chmod 600 on
//! Unix so other local accounts cannot read it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use reqmgr_core::{Identity, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: Uuid,
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub login_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(identity: &Identity, timeout_secs: u64) -> Self {
        let login_time = Utc::now();
        Self {
            token: Uuid::new_v4(),
            user_id: identity.id,
            username: identity.username.clone(),
            display_name: identity.display_name.clone(),
            email: identity.email.clone(),
            role: identity.role,
            login_time,
            expires_at: login_time + Duration::seconds(timeout_secs as i64),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.user_id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Reads and writes the session file in one directory.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The per-user default: `~/.reqmgr`.
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir().context("cannot determine the home directory")?;
        Ok(Self::new(home.join(".reqmgr")))
    }

    fn file(&self) -> PathBuf {
        self.dir.join("session")
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create {}", self.dir.display()))?;

        let path = self.file();
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&path, json)
            .with_context(|| format!("cannot write session file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// The saved session, if one exists and has not expired. Corrupt or
    /// expired files are removed on the way.
    pub fn load(&self) -> Result<Option<Session>> {
        let path = self.file();
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read session file {}", path.display()))?;

        let session: Session = match serde_json::from_str(&content) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("discarding unreadable session file: {}", e);
                self.clear()?;
                return Ok(None);
            }
        };

        if session.is_expired() {
            self.clear()?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Removes the session file. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        let path = self.file();
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("cannot remove session file {}", path.display()))?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> Identity {
        Identity {
            id: 1,
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            role: Role::Admin,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        store.save(&Session::new(&identity(), 3600)).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.identity(), identity());
        assert!(!loaded.is_expired());
    }

    #[test]
    fn test_expired_session_is_cleared_on_load() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        store.save(&Session::new(&identity(), 0)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(store.load().unwrap().is_none());
        // The file is gone, not just ignored.
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn test_corrupt_session_is_cleared_on_load() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("session"), "{ not json").unwrap();

        assert!(store.load().unwrap().is_none());
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn test_logout_reports_whether_a_session_existed() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        assert!(!store.clear().unwrap());
        store.save(&Session::new(&identity(), 3600)).unwrap();
        assert!(store.clear().unwrap());
    }
}
