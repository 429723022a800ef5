//! Single-document state persistence for the notifier.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lmn_core::StateDoc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "lmn-store";

/// Loads and replaces the whole notifier state as one JSON document at a
/// fixed path. The document is owned by exactly one running instance;
/// concurrent instances must point at distinct paths.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted document. A missing file is an empty document;
    /// a present but unparseable file is an error.
    pub async fn load(&self) -> anyhow::Result<StateDoc> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state document, starting empty");
                return Ok(StateDoc::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Replaces the document atomically via a uniquely named temp file and a
    /// rename, so a crash mid-write never leaves a torn document behind.
    pub async fn save(&self, doc: &StateDoc) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(doc).context("serializing state document")?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let temp_name = format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len());
        let temp_path = match parent {
            Some(parent) => parent.join(&temp_name),
            None => PathBuf::from(&temp_name),
        };

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp state file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp state file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp state file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp state {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "state document saved");
        Ok(())
    }
}
