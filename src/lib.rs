//! # Secret Populator
//!
//! Populates secret store backends from declarative `ExternalSecret`
//! definitions. Each definition maps destination fields to their value
//! sources: literal copies of existing secrets, schema defaults, generated
//! credential material, or templates composed from other secrets.
//!
//! Supported backends: HashiCorp Vault KV v2, Google Cloud Secret Manager,
//! Azure Key Vault, and cluster-native Kubernetes Secrets.
//!
//! A populate run is partially idempotent by construction: generated values
//! are created once and then left alone, literal and templated values are
//! recomputed every run and written only when they differ, so re-running
//! against unchanged inputs writes nothing and converges as new source
//! secrets appear.

pub mod backoff;
pub mod cli;
pub mod crd;
pub mod error;
pub mod extsecrets;
pub mod populate;
pub mod resolver;
pub mod schemas;
pub mod store;
pub mod templater;

pub use crd::{BackendType, ExternalSecret, ExternalSecretSpec};
pub use error::{Error, Result, StoreError};
pub use populate::{DefinitionState, Options, RunReport};
