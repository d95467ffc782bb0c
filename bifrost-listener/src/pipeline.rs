use crate::discovery::{filter_preferred_paths, ClusterDiscovery, RestMapper};
use crate::prelude::*;
use crate::schema_builder::SchemaBuilder;

use bifrost_core::artifact::Artifact;
use bifrost_core::metadata::ClusterMetadata;
use bifrost_core::store::ArtifactStore;
use std::collections::HashMap;
use tracing::{info, warn};

/// Drives discovery through the schema builder and into the artifact store.
///
/// One pipeline instance serves every source strategy; only the discovery
/// handle and the metadata differ per target cluster.
#[derive(Clone)]
pub struct ArtifactPipeline {
    builder: SchemaBuilder,
    store: ArtifactStore,
}

impl ArtifactPipeline {
    pub fn new(store: ArtifactStore) -> Self {
        ArtifactPipeline {
            builder: SchemaBuilder::default(),
            store,
        }
    }

    pub fn with_builder(mut self, builder: SchemaBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Discovers the target cluster and builds an artifact without metadata.
    /// Paths that fail to fetch or parse are skipped, not fatal.
    pub async fn generate(
        &self,
        discovery: &dyn ClusterDiscovery,
        extra_categories: &HashMap<String, Vec<String>>,
    ) -> Result<Artifact> {
        let preferred = discovery.preferred_resources().await?;
        let mapper = RestMapper::from_resource_lists(&preferred);
        let paths = filter_preferred_paths(discovery.openapi_v3_paths().await?, &preferred);

        let mut documents = Vec::with_capacity(paths.len());
        for (path, reference) in &paths {
            match discovery.fetch_schema(reference).await {
                Ok(document) => documents.push(document),
                Err(err) => {
                    warn!("skipping OpenAPI path {path}: {err:?}");
                }
            }
        }
        info!(
            "built schema input from {} of {} preferred paths at {}",
            documents.len(),
            paths.len(),
            discovery.host()
        );

        Ok(self
            .builder
            .build(&documents, &preferred, &mapper, extra_categories))
    }

    /// Stamps metadata and writes the artifact, skipping the write when the
    /// stored bytes are already identical. Returns whether bytes changed.
    pub fn publish(
        &self,
        key: &str,
        artifact: Artifact,
        metadata: ClusterMetadata,
    ) -> Result<bool> {
        let artifact = artifact.with_metadata(metadata);
        let bytes = artifact.to_bytes().map_err(crate::errors::ErrorKind::from)?;
        let changed = self
            .store
            .write(key, &bytes)
            .map_err(crate::errors::ErrorKind::from)?;
        Ok(changed)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .map_err(crate::errors::ErrorKind::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::OpenApiPathRef;
    use async_trait::async_trait;
    use bifrost_core::artifact::GVK_EXTENSION;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    struct StaticDiscovery;

    #[async_trait]
    impl ClusterDiscovery for StaticDiscovery {
        fn host(&self) -> &str {
            "https://api.example"
        }

        async fn preferred_resources(&self) -> Result<Vec<APIResourceList>> {
            Ok(vec![serde_json::from_value(json!({
                "groupVersion": "v1",
                "resources": [
                    {"name": "pods", "singularName": "pod", "namespaced": true, "kind": "Pod", "verbs": []}
                ]
            }))
            .expect("list")])
        }

        async fn openapi_v3_paths(&self) -> Result<BTreeMap<String, OpenApiPathRef>> {
            let mut paths = BTreeMap::new();
            paths.insert(
                "api/v1".to_string(),
                OpenApiPathRef {
                    server_relative_url: "/openapi/v3/api/v1".to_string(),
                },
            );
            paths.insert(
                "apis/ignored/v9".to_string(),
                OpenApiPathRef {
                    server_relative_url: "/openapi/v3/apis/ignored/v9".to_string(),
                },
            );
            Ok(paths)
        }

        async fn fetch_schema(&self, path: &OpenApiPathRef) -> Result<Value> {
            assert_eq!(path.server_relative_url, "/openapi/v3/api/v1");
            Ok(json!({
                "components": {
                    "schemas": {
                        "io.k8s.api.core.v1.Pod": {
                            "type": "object",
                            GVK_EXTENSION: [{"group": "", "version": "v1", "kind": "Pod"}]
                        }
                    }
                }
            }))
        }
    }

    #[tokio::test]
    async fn generate_then_publish_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path()).expect("store");
        let pipeline = ArtifactPipeline::new(store);

        let artifact = pipeline
            .generate(&StaticDiscovery, &HashMap::new())
            .await
            .expect("generate");
        assert!(artifact.definitions.contains_key(".v1.Pod"));

        let metadata = ClusterMetadata::new("https://api.example", "kubernetes");
        assert!(pipeline
            .publish("kubernetes", artifact.clone(), metadata.clone())
            .expect("publish"));
        // Unchanged cluster, unchanged bytes.
        assert!(!pipeline
            .publish("kubernetes", artifact, metadata)
            .expect("republish"));

        pipeline.remove("kubernetes").expect("remove");
        assert!(pipeline.store().list().expect("list").is_empty());
    }
}
