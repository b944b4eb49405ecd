use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not {operation} {path:?}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: Uuid,
    pub path: PathBuf,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct OpenedArtifact {
    pub artifact: Artifact,
    pub file: tokio::fs::File,
    pub len: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    index: Mutex<HashMap<Uuid, Artifact>>,
}

impl ArtifactStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|error| StoreError::io("create", &dir, error))?;

        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|error| StoreError::io("list", &dir, error))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| StoreError::io("list", &dir, error))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(id) = artifact_id(name) else {
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(error) => {
                    warn!("could not stat {:?}: {error}", path);
                    continue;
                }
            };
            let created_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            index.entry(id).or_insert_with(|| Artifact {
                id,
                filename: name.to_string(),
                path: path.clone(),
                created_at,
            });
        }

        info!(
            dir = %dir.display(),
            artifacts = index.len(),
            "storage directory ready"
        );

        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// yt-dlp output template for a job: `<dir>/<id>.%(ext)s`.
    pub fn output_template(&self, id: Uuid) -> String {
        self.dir
            .join(format!("{id}.%(ext)s"))
            .to_string_lossy()
            .into_owned()
    }

    pub async fn register(&self, id: Uuid, path: PathBuf) -> Artifact {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{id}.mp4"));
        let artifact = Artifact {
            id,
            path,
            filename,
            created_at: Utc::now(),
        };

        self.index.lock().await.insert(id, artifact.clone());
        debug!(%id, filename = %artifact.filename, "artifact indexed");
        artifact
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.index.lock().await.contains_key(&id)
    }

    /// Opens under the index lock; the sweep takes the same lock to unlink.
    pub async fn open_artifact(&self, id: Uuid) -> Result<Option<OpenedArtifact>, StoreError> {
        let mut index = self.index.lock().await;
        let Some(artifact) = index.get(&id).cloned() else {
            return Ok(None);
        };

        let file = match tokio::fs::File::open(&artifact.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(%id, path = ?artifact.path, "indexed artifact vanished from disk");
                index.remove(&id);
                return Ok(None);
            }
            Err(error) => return Err(StoreError::io("open", &artifact.path, error)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|error| StoreError::io("stat", &artifact.path, error))?
            .len();

        Ok(Some(OpenedArtifact {
            artifact,
            file,
            len,
        }))
    }

    pub async fn locate_output(
        &self,
        id: Uuid,
        printed_path: Option<&str>,
    ) -> Result<Option<PathBuf>, StoreError> {
        let canonical_dir = tokio::fs::canonicalize(&self.dir)
            .await
            .map_err(|error| StoreError::io("resolve", &self.dir, error))?;

        if let Some(value) = printed_path {
            for candidate in [PathBuf::from(value), self.dir.join(value)] {
                if let Some(path) = resolve_candidate(&canonical_dir, &candidate).await? {
                    return Ok(Some(path));
                }
            }
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|error| StoreError::io("list", &self.dir, error))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| StoreError::io("list", &self.dir, error))?
        {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(artifact_id)
                .is_some_and(|found| found == id);
            if matches && let Some(path) = resolve_candidate(&canonical_dir, &path).await? {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    pub async fn sweep_expired(
        &self,
        max_age: Duration,
        now: SystemTime,
    ) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|error| StoreError::io("list", &self.dir, error))?;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => return Err(StoreError::io("list", &self.dir, error)),
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("could not stat {:?}: {error}", path);
                    report.failed += 1;
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let age = match metadata.modified() {
                Ok(modified_at) => now.duration_since(modified_at).unwrap_or_default(),
                Err(error) => {
                    warn!("could not read mtime of {:?}: {error}", path);
                    report.failed += 1;
                    continue;
                }
            };
            if age <= max_age {
                continue;
            }

            let mut index = self.index.lock().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), age_seconds = age.as_secs(), "removed expired artifact");
                    report.removed += 1;
                }
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    warn!("could not remove {:?}: {error}", path);
                    report.failed += 1;
                    continue;
                }
            }

            let name = path.file_name().and_then(|name| name.to_str());
            if let Some(id) = name.and_then(artifact_id)
                && index
                    .get(&id)
                    .is_some_and(|artifact| Some(artifact.filename.as_str()) == name)
            {
                index.remove(&id);
            }
        }

        Ok(report)
    }
}

/// `<uuid>.<ext>`, excluding unfinished downloads.
fn artifact_id(filename: &str) -> Option<Uuid> {
    if PARTIAL_SUFFIXES
        .iter()
        .any(|suffix| filename.ends_with(suffix))
    {
        return None;
    }

    let stem = filename.split('.').next()?;
    Uuid::parse_str(stem).ok()
}

async fn resolve_candidate(
    canonical_dir: &Path,
    candidate: &Path,
) -> Result<Option<PathBuf>, StoreError> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(StoreError::io("stat", candidate, error)),
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = tokio::fs::canonicalize(candidate)
        .await
        .map_err(|error| StoreError::io("resolve", candidate, error))?;

    if !canonical.starts_with(canonical_dir) {
        warn!("ignoring file outside the storage directory: {:?}", canonical);
        return Ok(None);
    }

    Ok(Some(canonical))
}
