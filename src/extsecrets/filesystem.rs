//! Filesystem-backed definition source, for populating before a cluster
//! exists (boot credentials) and for tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::DefinitionSource;
use crate::crd::ExternalSecret;
use crate::error::Error;

/// Reads `ExternalSecret` YAML documents from `<dir>/<namespace>/*.yaml`.
pub struct FilesystemSource {
    dir: PathBuf,
}

impl FilesystemSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn parse_file(path: &Path, namespace: &str) -> Result<ExternalSecret, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        // Name the failed definition after its file so the run report points
        // at something actionable.
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("<unparsed>");
        let mut secret: ExternalSecret = serde_yaml::from_str(&text)
            .map_err(|e| Error::malformed(stem, format!("{}: {e}", path.display())))?;
        // File-borne definitions may omit the namespace; they belong to the
        // directory they were found under.
        if secret.metadata.namespace.is_none() {
            secret.metadata.namespace = Some(namespace.to_string());
        }
        Ok(secret)
    }
}

#[async_trait]
impl DefinitionSource for FilesystemSource {
    async fn load(&self, namespace: &str) -> Result<Vec<Result<ExternalSecret, Error>>, Error> {
        let root = self.dir.join(namespace);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Config(format!(
                "walking {}: {e}",
                root.display()
            )))?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            results.push(Self::parse_file(path, namespace));
        }
        debug!(namespace = %namespace, count = results.len(), dir = %root.display(), "loaded definitions from filesystem");
        Ok(results)
    }
}
