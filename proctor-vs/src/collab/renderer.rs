//! Report rendering collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::is_plain_file_name;
use crate::models::ReportBody;

/// Reference to a rendered report artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rendering failure
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Report artifact not found: {0}")]
    NotFound(String),

    #[error("Report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Report IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report rendering failed: {0}")]
    Backend(String),
}

/// Turns a closed session into a durable artifact
///
/// Rendering the same session twice must be safe: the artifact location is
/// a function of the session epoch, so a retry overwrites the earlier attempt.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, report: &ReportBody) -> Result<ArtifactRef, RenderError>;

    /// Load a previously rendered artifact
    async fn fetch(&self, artifact: &ArtifactRef) -> Result<serde_json::Value, RenderError>;
}

/// Writes reports as pretty-printed JSON documents
pub struct JsonReportRenderer {
    reports_dir: PathBuf,
}

impl JsonReportRenderer {
    pub async fn open(reports_dir: &Path) -> Result<Self, RenderError> {
        tokio::fs::create_dir_all(reports_dir).await?;
        Ok(Self {
            reports_dir: reports_dir.to_path_buf(),
        })
    }

    pub fn artifact_name(epoch: u64) -> String {
        format!("session-{:06}.json", epoch)
    }

    pub fn artifact_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.reports_dir.join(artifact.as_str())
    }
}

#[async_trait]
impl ReportRenderer for JsonReportRenderer {
    async fn render(&self, report: &ReportBody) -> Result<ArtifactRef, RenderError> {
        let artifact = ArtifactRef::new(Self::artifact_name(report.epoch));
        let path = self.artifact_path(&artifact);
        let tmp_path = path.with_extension("json.tmp");

        let document = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&tmp_path, document).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(
            epoch = report.epoch,
            report_id = %report.report_id,
            path = %path.display(),
            "Report rendered"
        );
        Ok(artifact)
    }

    async fn fetch(&self, artifact: &ArtifactRef) -> Result<serde_json::Value, RenderError> {
        if !is_plain_file_name(artifact.as_str()) {
            return Err(RenderError::NotFound(artifact.to_string()));
        }

        let bytes = match tokio::fs::read(self.artifact_path(artifact)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::NotFound(artifact.to_string()))
            }
            Err(e) => return Err(RenderError::Io(e)),
        };

        Ok(serde_json::from_slice(&bytes)?)
    }
}
