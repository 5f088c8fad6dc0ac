use crate::error::MirrorError;
use crate::models::Identity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimal copy of the signed-in identity for readers that cannot wait on
/// the session holder. Advisory only, never a source of truth.
pub trait IdentityMirror: Send + Sync {
    fn store(&self, identity: &Identity) -> Result<(), MirrorError>;
    fn clear(&self) -> Result<(), MirrorError>;
    fn load(&self) -> Result<Option<Identity>, MirrorError>;
}

/// On-disk layout: the two entries `user_id` and `user_email`.
#[derive(Debug, Serialize, Deserialize)]
struct MirrorEntries {
    user_id: String,
    #[serde(default)]
    user_email: String,
}

impl From<&Identity> for MirrorEntries {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            user_email: identity.email.clone().unwrap_or_default(),
        }
    }
}

impl From<MirrorEntries> for Identity {
    fn from(entries: MirrorEntries) -> Self {
        Self {
            user_id: entries.user_id,
            email: Some(entries.user_email).filter(|e| !e.is_empty()),
        }
    }
}

pub struct FileMirror {
    path: PathBuf,
}

impl FileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityMirror for FileMirror {
    fn store(&self, identity: &Identity) -> Result<(), MirrorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&MirrorEntries::from(identity))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), MirrorError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn load(&self) -> Result<Option<Identity>, MirrorError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let entries: MirrorEntries = serde_json::from_slice(&bytes)?;
                Ok(Some(entries.into()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryMirror {
    entries: RwLock<Option<Identity>>,
}

impl IdentityMirror for MemoryMirror {
    fn store(&self, identity: &Identity) -> Result<(), MirrorError> {
        *self.entries.write() = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), MirrorError> {
        *self.entries.write() = None;
        Ok(())
    }

    fn load(&self) -> Result<Option<Identity>, MirrorError> {
        Ok(self.entries.read().clone())
    }
}
