use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::StaffUser;

#[derive(Debug, Error)]
pub enum RosterCacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterCacheFile {
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    staff: Vec<StaffUser>,
}

/// Last roster seen online, kept on disk for offline PIN login.
/// Holds hashed PINs only.
#[derive(Debug, Clone)]
pub struct RosterCache {
    path: PathBuf,
}

impl RosterCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached roster; empty when nothing has been cached yet.
    pub async fn load(&self) -> Result<Vec<StaffUser>, RosterCacheError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file: RosterCacheFile = serde_json::from_str(&content)?;
        Ok(file.staff)
    }

    /// Replaces the cached roster. Written to a sibling file first and
    /// renamed so a crash never leaves a half-written cache.
    pub async fn save(&self, staff: &[StaffUser]) -> Result<(), RosterCacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = RosterCacheFile {
            saved_at: Some(Utc::now()),
            staff: staff.to_vec(),
        };
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = staff.len(), "roster cache updated");
        Ok(())
    }
}
