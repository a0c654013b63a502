use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ChatError;

/// Namespace key the session token is stored under.
pub const SESSION_TOKEN_KEY: &str = "chat_session_token";

const STORE_FILE_NAME: &str = "session.json";

/// Persists the single opaque session token across restarts.
///
/// The backing file is a flat JSON object so other keys written by a host
/// application survive our saves.
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by `session.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<String>, ChatError> {
        let mut entries = self.read_entries()?;
        Ok(entries
            .remove(SESSION_TOKEN_KEY)
            .filter(|token| !token.is_empty()))
    }

    pub fn save(&self, token: &str) -> Result<(), ChatError> {
        let mut entries = match self.read_entries() {
            Err(ChatError::StoreFormat(e)) => {
                warn!("Overwriting corrupt session store {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
            other => other?,
        };
        entries.insert(SESSION_TOKEN_KEY.to_string(), token.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!("Saved session token to {}", self.path.display());
        Ok(())
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, ChatError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}
