//! # Error Types
//!
//! Error taxonomy for the populate run.
//!
//! Two layers: [`StoreError`] for failures crossing the secret-store
//! abstraction (transport, write conflicts), and [`Error`] for everything the
//! driver attributes to a single definition. Transport errors are retryable
//! under the same backoff budget as missing dependencies; malformed
//! definitions, template render faults and write conflicts are terminal for
//! the definition they belong to and never abort the batch.

use thiserror::Error;

/// Errors surfaced by a secret store backend.
///
/// Absence of a value is not an error — `get_value` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or auth failure against the backend. Retryable.
    #[error("{backend} transport error: {message}")]
    Transport { backend: &'static str, message: String },

    /// The backend rejected a write (permission, quota, immutability).
    #[error("{backend} rejected write to {scope}/{property}: {message}")]
    WriteConflict { backend: &'static str, scope: String, property: String, message: String },

    /// The backend cannot perform this operation (e.g. enumerating properties
    /// of a flat-named store).
    #[error("{backend} does not support {operation}")]
    Unsupported { backend: &'static str, operation: &'static str },
}

impl StoreError {
    pub fn transport(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Transport { backend, message: message.into() }
    }

    /// Whether the driver may retry the operation under its backoff budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A failure attributed to a single external-secret definition.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The definition failed to parse or failed schema annotation.
    #[error("malformed definition {name}: {reason}")]
    MalformedDefinition { name: String, reason: String },

    /// One or more fields still reference absent sources after the retry
    /// budget was exhausted.
    #[error("unsatisfied dependencies for {name}: {fields:?}")]
    UnsatisfiedDependency { name: String, fields: Vec<String> },

    /// Syntax or evaluation fault in a composed field. Not retryable.
    #[error("template render failed for field {field}: {message}")]
    TemplateRender { field: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error reading {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("yaml error in {path}: {source}")]
    Yaml { path: String, source: serde_yaml::Error },
}

impl Error {
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDefinition { name: name.into(), reason: reason.into() }
    }

    /// Retryable errors re-enter the resolve loop; everything else is a
    /// terminal failure for the definition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::UnsatisfiedDependency { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        let err = StoreError::transport("vault", "connection refused");
        assert!(err.is_retryable());
        assert!(Error::from(err).is_retryable());
    }

    #[test]
    fn test_write_conflict_is_terminal() {
        let err = StoreError::WriteConflict {
            backend: "kubernetes",
            scope: "admin-user".to_string(),
            property: "password".to_string(),
            message: "forbidden".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_template_render_is_terminal() {
        let err = Error::TemplateRender {
            field: "settingsXml".to_string(),
            message: "unexpected end of template".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unsatisfied_dependency_is_retryable() {
        let err = Error::UnsatisfiedDependency {
            name: "pipeline-user".to_string(),
            fields: vec!["token".to_string()],
        };
        assert!(err.is_retryable());
    }
}
