//! Local identity persistence
//!
//! Drivers and riders get a numeric id on first run, generated locally
//! and reused on every later run from the same data directory. Ids are
//! in 1..=1_000_000, matching what the backend expects from its web
//! clients.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

const IDENTITY_FILE: &str = "identity.toml";
const ID_SPACE: u64 = 1_000_000;

/// Which side of the platform this process acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Driver,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IdentityFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    driver_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

/// Loads and persists per-role ids under one data directory.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(IDENTITY_FILE),
        }
    }

    /// The id for `role`, generating and persisting one on first use.
    pub fn load_or_create(&self, role: Role) -> Result<i64> {
        let mut file = self.read_file()?;

        let slot = match role {
            Role::Driver => &mut file.driver_id,
            Role::User => &mut file.user_id,
        };

        if let Some(id) = *slot {
            debug!(role = role.as_str(), id, "Loaded existing identity");
            return Ok(id);
        }

        let id = generate_id();
        *slot = Some(id);
        if file.created_at.is_none() {
            file.created_at = Some(chrono::Utc::now().to_rfc3339());
        }
        self.write_file(&file)?;
        info!(role = role.as_str(), id, "Generated new identity");
        Ok(id)
    }

    fn read_file(&self) -> Result<IdentityFile> {
        if !self.path.exists() {
            return Ok(IdentityFile::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| Error::IoRead {
            path: self.path.clone(),
            source: e,
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid identity file: {}", e)))
    }

    fn write_file(&self, file: &IdentityFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = toml::to_string_pretty(file)?;
        fs::write(&self.path, content).map_err(|e| Error::IoWrite {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// A positive id in 1..=1_000_000, drawn from UUID entropy.
fn generate_id() -> i64 {
    let uuid = Uuid::new_v4();
    let (hi, _) = uuid.as_u64_pair();
    (hi % ID_SPACE) as i64 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_id_generated_in_range() {
        for _ in 0..100 {
            let id = generate_id();
            assert!(id >= 1 && id <= ID_SPACE as i64);
        }
    }

    #[test]
    fn test_id_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());

        let first = store.load_or_create(Role::Driver).unwrap();
        let second = store.load_or_create(Role::Driver).unwrap();
        assert_eq!(first, second);

        // A fresh store over the same directory sees the same id.
        let other = IdentityStore::new(dir.path());
        assert_eq!(other.load_or_create(Role::Driver).unwrap(), first);
    }

    #[test]
    fn test_roles_have_independent_ids() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());

        let driver = store.load_or_create(Role::Driver).unwrap();
        let user = store.load_or_create(Role::User).unwrap();

        // Both persisted in the same file.
        let content = fs::read_to_string(dir.path().join(IDENTITY_FILE)).unwrap();
        assert!(content.contains(&format!("driver_id = {}", driver)));
        assert!(content.contains(&format!("user_id = {}", user)));
        assert!(content.contains("created_at"));
    }

    #[test]
    fn test_corrupt_identity_file_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IDENTITY_FILE), "not [ valid toml").unwrap();

        let store = IdentityStore::new(dir.path());
        let err = store.load_or_create(Role::User).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
