//! Evidence persistence under `<root>/<incident_id>/<token>_<sanitized name>`.

use crate::error::StorageError;
use incident_schema::EvidenceItem;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const DEFAULT_MAX_EVIDENCE_BYTES: u64 = 5 * 1024 * 1024;
const WRITE_CHUNK_BYTES: usize = 1024 * 1024;
const DEFAULT_EVIDENCE_NAME: &str = "evidence";

/// One uploaded file as received from the submission boundary.
#[derive(Clone, Debug)]
pub struct EvidenceUpload {
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

impl EvidenceUpload {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: Some(filename.into()),
            data: data.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvidence {
    pub item: EvidenceItem,
    pub key: String,
}

#[derive(Clone, Debug)]
pub struct EvidenceStore {
    root: PathBuf,
    max_bytes: u64,
}

impl EvidenceStore {
    pub fn open(root: impl AsRef<Path>, max_bytes: u64) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root, max_bytes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Stores every upload within the size ceiling. Oversized uploads are
    /// dropped from the result and leave no file behind. A write failure
    /// removes everything stored by this call before returning the error.
    pub async fn save(
        &self,
        incident_id: &str,
        uploads: Vec<EvidenceUpload>,
    ) -> Result<Vec<StoredEvidence>, StorageError> {
        if !is_valid_incident_id(incident_id) {
            return Err(StorageError::InvalidIncidentId(incident_id.to_string()));
        }
        let incident_dir = self.root.join(incident_id);
        tokio::fs::create_dir_all(&incident_dir).await?;

        let mut stored = Vec::new();
        for upload in uploads {
            let original = upload
                .filename
                .as_deref()
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_EVIDENCE_NAME);
            let key = format!(
                "{}_{}",
                uuid::Uuid::new_v4().simple(),
                sanitize_filename(original)
            );
            let target = incident_dir.join(&key);

            let written = match self.write_capped(&target, &upload.data).await {
                Ok(written) => written,
                Err(err) => {
                    tracing::error!(incident_id, filename = original, %err, "failed to store evidence");
                    discard(&incident_dir, &stored).await;
                    return Err(err);
                }
            };
            let Some(size) = written else {
                tracing::warn!(
                    incident_id,
                    filename = original,
                    max_bytes = self.max_bytes,
                    "evidence file exceeds size limit; skipping"
                );
                continue;
            };

            tracing::debug!(incident_id, %key, size, "stored evidence");
            let filename = match upload.filename {
                Some(name) if !name.is_empty() => name,
                _ => key.clone(),
            };
            stored.push(StoredEvidence {
                item: EvidenceItem {
                    filename,
                    url: format!("/evidence/{incident_id}/{key}"),
                    size_bytes: size,
                    analysis: None,
                },
                key,
            });
        }
        Ok(stored)
    }

    /// Maps a stored key back to its file. Anything missing or outside the
    /// root resolves to `StorageError::NotFound`.
    pub fn resolve(&self, incident_id: &str, key: &str) -> Result<PathBuf, StorageError> {
        let candidate = self.root.join(incident_id).join(key);
        let Ok(resolved) = candidate.canonicalize() else {
            return Err(StorageError::NotFound);
        };
        if !resolved.starts_with(&self.root) {
            tracing::warn!(incident_id, key, "evidence lookup escaped storage root");
            return Err(StorageError::NotFound);
        }
        if !resolved.is_file() {
            return Err(StorageError::NotFound);
        }
        Ok(resolved)
    }

    /// `resolve` on the blocking pool.
    pub async fn locate(&self, incident_id: &str, key: &str) -> Result<PathBuf, StorageError> {
        let store = self.clone();
        let (id, owned_key) = (incident_id.to_string(), key.to_string());
        tokio::task::spawn_blocking(move || store.resolve(&id, &owned_key))
            .await
            .unwrap_or_else(|err| {
                tracing::error!(incident_id, key, %err, "evidence lookup task failed");
                Err(StorageError::NotFound)
            })
    }

    async fn write_capped(&self, target: &Path, data: &[u8]) -> Result<Option<u64>, StorageError> {
        let result = self.write_chunks(target, data).await;
        match result {
            Ok(Some(total)) => Ok(Some(total)),
            Ok(None) => {
                remove_partial(target).await;
                Ok(None)
            }
            Err(err) => {
                remove_partial(target).await;
                Err(err)
            }
        }
    }

    async fn write_chunks(&self, target: &Path, data: &[u8]) -> Result<Option<u64>, StorageError> {
        let mut file = tokio::fs::File::create(target).await?;
        let mut total: u64 = 0;
        for chunk in data.chunks(WRITE_CHUNK_BYTES) {
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Ok(None);
            }
            file.write_all(chunk).await?;
        }
        file.flush().await?;
        Ok(Some(total))
    }
}

async fn discard(incident_dir: &Path, stored: &[StoredEvidence]) {
    for entry in stored {
        remove_partial(&incident_dir.join(&entry.key)).await;
    }
}

async fn remove_partial(target: &Path) {
    if let Err(err) = tokio::fs::remove_file(target).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %target.display(), %err, "failed to remove partial evidence");
        }
    }
}

/// Maps anything outside `[A-Za-z0-9._-]` to `_` and trims leading/trailing
/// `.` and `_`. Never returns an empty name.
pub fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches(|ch| ch == '.' || ch == '_');
    if trimmed.is_empty() {
        DEFAULT_EVIDENCE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_valid_incident_id(incident_id: &str) -> bool {
    !incident_id.is_empty()
        && incident_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
}
