//! Cluster-backed definition source.

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use tracing::debug;

use super::DefinitionSource;
use crate::crd::ExternalSecret;
use crate::error::Error;

/// Lists `ExternalSecret` resources in the target namespace.
pub struct ClusterSource {
    client: kube::Client,
}

impl ClusterSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DefinitionSource for ClusterSource {
    async fn load(&self, namespace: &str) -> Result<Vec<Result<ExternalSecret, Error>>, Error> {
        let api: Api<ExternalSecret> = Api::namespaced(self.client.clone(), namespace);
        let mut items = api.list(&ListParams::default()).await?.items;
        items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        debug!(namespace = %namespace, count = items.len(), "loaded definitions from cluster");
        Ok(items.into_iter().map(Ok).collect())
    }
}
