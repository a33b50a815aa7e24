//! On-disk store for downloaded message media.
//!
//! Files land in `<root>/<kind>/<unix-nanos>.<ext>`. The extension is a
//! fixed guess per kind; the payload itself is never inspected.

use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use crate::classifier::ContentKind;
use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write `bytes` under the directory for `kind` and return the new path.
    pub async fn save(&self, kind: ContentKind, bytes: &[u8]) -> Result<PathBuf, BridgeError> {
        let dir = self.root.join(kind.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let filename = match extension_for(kind) {
            Some(ext) => format!("{}.{}", nanos, ext),
            None => nanos.to_string(),
        };
        let path = dir.join(filename);

        tokio::fs::write(&path, bytes).await?;
        debug!("Saved {} media ({} bytes) to {}", kind.as_str(), bytes.len(), path.display());
        Ok(path)
    }
}

/// Default extension for each media kind; non-media kinds get none.
pub fn extension_for(kind: ContentKind) -> Option<&'static str> {
    match kind {
        ContentKind::Image => Some("jpg"),
        ContentKind::Video => Some("mp4"),
        ContentKind::Audio => Some("ogg"),
        ContentKind::Document => Some("bin"),
        _ => None,
    }
}
