use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    quality::Quality,
    store::{Artifact, ArtifactStore, StoreError},
};

const OUTPUT_CONTAINER: &str = "mp4";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Tool(String),
    #[error("{program} is not installed or not on PATH")]
    NotInstalled { program: String },
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("the downloaded file could not be found in the storage directory")]
    MissingOutput,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct FetchJob {
    pub id: Uuid,
    pub url: String,
    pub quality: Quality,
    pub output_template: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutput {
    /// Final path reported by the tool, if it printed one.
    pub printed_path: Option<String>,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, job: &FetchJob) -> Result<FetchOutput, FetchError>;
}

/// Runs the `yt-dlp` executable and waits for it; there is no timeout.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
    cookie_file: PathBuf,
    converter_path: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            program: config.yt_dlp_bin.clone(),
            cookie_file: config.cookie_file.clone(),
            converter_path: config.converter_path.clone(),
        }
    }

    pub fn build_args(&self, job: &FetchJob) -> Vec<String> {
        vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "-f".to_string(),
            job.quality.format_selector(),
            "-o".to_string(),
            job.output_template.clone(),
            "--merge-output-format".to_string(),
            OUTPUT_CONTAINER.to_string(),
            "--recode-video".to_string(),
            OUTPUT_CONTAINER.to_string(),
            "--cookies".to_string(),
            self.cookie_file.to_string_lossy().into_owned(),
            "--ffmpeg-location".to_string(),
            self.converter_path.to_string_lossy().into_owned(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            job.url.clone(),
        ]
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, job: &FetchJob) -> Result<FetchOutput, FetchError> {
        let args = self.build_args(job);
        debug!(id = %job.id, program = %self.program, ?args, "spawning fetch tool");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    FetchError::NotInstalled {
                        program: self.program.clone(),
                    }
                } else {
                    FetchError::Spawn {
                        program: self.program.clone(),
                        source: error,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(FetchError::Tool(run_error_message(&output.stderr)));
        }

        Ok(FetchOutput {
            printed_path: extract_printed_path(&output.stdout),
        })
    }
}

/// Fetches `url` into the store under a fresh id and indexes the result.
pub async fn dispatch(
    store: &ArtifactStore,
    fetcher: &dyn MediaFetcher,
    url: &str,
    quality: Quality,
) -> Result<Artifact, FetchError> {
    let id = Uuid::new_v4();
    let job = FetchJob {
        id,
        url: url.to_string(),
        quality,
        output_template: store.output_template(id),
    };

    info!(%id, url, ?quality, "download started");
    let output = match fetcher.fetch(&job).await {
        Ok(output) => output,
        Err(error) => {
            warn!(%id, url, "download failed: {error}");
            return Err(error);
        }
    };

    let path = store
        .locate_output(id, output.printed_path.as_deref())
        .await?
        .ok_or(FetchError::MissingOutput)?;
    let artifact = store.register(id, path).await;
    info!(%id, filename = %artifact.filename, "download finished");

    Ok(artifact)
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the download")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        "Unsupported or invalid URL.".to_string()
    } else {
        message
    }
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}
