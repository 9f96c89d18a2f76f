//! Session files: the inputs of one editing session on disk.
//!
//! ```yaml
//! definition: |
//!   (define sq (lambda (n) ,A))
//! semantics: interp.scm      # optional, relative to the session file
//! examples:
//!   - input: (sq 5)
//!     output: "25"
//! ```
//!
//! JSON is accepted with the same shape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::{Example, Snapshot};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON session: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML session: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported session file extension: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub definition: String,
    /// Interpreter semantics file, resolved against the session file's directory.
    #[serde(default)]
    pub semantics: Option<PathBuf>,
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl Session {
    pub async fn load(path: &Path) -> Result<Self, SessionError> {
        let text = read(path).await?;
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&text, &format)
    }

    fn parse(text: &str, format: &str) -> Result<Self, SessionError> {
        match format {
            "json" => Ok(serde_json::from_str(text)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(text)?),
            other => Err(SessionError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Resolve the semantics file and build the snapshot for this session.
    pub async fn into_snapshot(self, base_dir: &Path) -> Result<Snapshot, SessionError> {
        let semantics = match &self.semantics {
            Some(file) => read(&base_dir.join(file)).await?,
            None => String::new(),
        };
        Ok(Snapshot {
            definition: self.definition,
            semantics,
            examples: self.examples,
        })
    }
}

/// Load `path` and turn it into a snapshot in one go.
pub async fn load_snapshot(path: &Path) -> Result<Snapshot, SessionError> {
    let session = Session::load(path).await?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    session.into_snapshot(base_dir).await
}

async fn read(path: &Path) -> Result<String, SessionError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SessionError::Read {
            path: path.to_path_buf(),
            source,
        })
}
