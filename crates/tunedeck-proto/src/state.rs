use crate::model::Identity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The one artifact that survives a restart: the bearer token and the
/// identity it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentSession {
    pub token: String,
    pub identity: Identity,
}

/// Reads and writes [`PersistentSession`] as pretty JSON.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, session: &PersistentSession) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json)?;
        debug!("session file written: {}", self.path.display());
        Ok(())
    }

    /// Missing or unreadable files both mean "no stored session".
    pub fn load(&self) -> Option<PersistentSession> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<PersistentSession>(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("ignoring corrupt session file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
