//! # Definition Sources
//!
//! Where the set of [`ExternalSecret`] definitions to populate comes from:
//! the cluster (listed through the Kubernetes API) or a directory of YAML
//! files laid out as `<dir>/<namespace>/<name>.yaml`.
//!
//! Loading returns one entry per definition in a deterministic order (sorted
//! by name or path), and a single malformed entry becomes an `Err` element
//! without aborting the rest of the batch. Only a wholesale failure to reach
//! the source at all is a load error.

use async_trait::async_trait;

use crate::crd::ExternalSecret;
use crate::error::Error;

pub mod cluster;
pub mod filesystem;

pub use cluster::ClusterSource;
pub use filesystem::FilesystemSource;

/// Supplies the definitions one populate run works through.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    async fn load(&self, namespace: &str) -> Result<Vec<Result<ExternalSecret, Error>>, Error>;
}
