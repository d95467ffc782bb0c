use crate::auth::ClaimsConfig;
use crate::connection::EndpointConnection;
use crate::errors::GatewayError;
use crate::prelude::*;
use crate::resolvers::ResourceInfo;
use crate::synthesizer::synthesize;

use async_graphql::dynamic::Schema;
use bifrost_core::artifact::Artifact;
use bifrost_core::store::ArtifactStore;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Quiet period after artifact-directory events before endpoints rebuild;
/// bursts from atomic replaces coalesce into one swap.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub claims: ClaimsConfig,
    pub should_impersonate: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        GatewayOptions {
            claims: ClaimsConfig::default(),
            should_impersonate: true,
        }
    }
}

/// One live GraphQL endpoint: the synthesized schema and the connection the
/// resolvers execute against. Immutable once built; rebuilds allocate a new
/// endpoint and swap the map entry, so requests holding the old `Arc` finish
/// against the generation they started with.
pub struct Endpoint {
    pub key: String,
    pub generation: u64,
    pub schema: Schema,
    pub resources: Vec<Arc<ResourceInfo>>,
    pub connection: EndpointConnection,
}

/// Owner of the endpoint map. Reads copy the `Arc` under a read lock and
/// dispatch without holding it; the watcher thread is the only writer.
pub struct EndpointRegistry {
    store: ArtifactStore,
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    generation: AtomicU64,
}

impl EndpointRegistry {
    pub fn new(store: ArtifactStore) -> Self {
        EndpointRegistry {
            store,
            endpoints: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .expect("endpoint map poisoned")
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .endpoints
            .read()
            .expect("endpoint map poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Builds (or rebuilds) the endpoint for one artifact key.
    pub async fn load(&self, key: &str) -> Result<()> {
        let bytes = self
            .store
            .read(key)
            .map_err(crate::errors::ErrorKind::from)?;
        let artifact = Artifact::from_bytes(&bytes).map_err(crate::errors::ErrorKind::from)?;
        let metadata = artifact.cluster_metadata.clone().ok_or_else(|| {
            GatewayError::schema(format!("artifact {key} carries no x-cluster-metadata"))
        })?;

        let synthesized = synthesize(&artifact)?;
        let connection = EndpointConnection::from_metadata(metadata).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let endpoint = Arc::new(Endpoint {
            key: key.to_string(),
            generation,
            schema: synthesized.schema,
            resources: synthesized.resources,
            connection,
        });

        self.endpoints
            .write()
            .expect("endpoint map poisoned")
            .insert(key.to_string(), endpoint);
        info!("endpoint {key} ready (generation {generation})");
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        let removed = self
            .endpoints
            .write()
            .expect("endpoint map poisoned")
            .remove(key);
        if removed.is_some() {
            info!("endpoint {key} removed");
        }
    }

    /// Startup pass: one endpoint per artifact already on disk. Broken
    /// artifacts are skipped, not fatal.
    pub async fn scan(&self) -> Result<()> {
        let keys = self
            .store
            .list()
            .map_err(crate::errors::ErrorKind::from)?;
        for key in keys {
            if let Err(err) = self.load(&key).await {
                warn!("skipping artifact {key}: {err:?}");
            }
        }
        Ok(())
    }

    /// Applies one filesystem event's outcome: a readable artifact rebuilds
    /// its endpoint, a missing file drops it.
    pub async fn reconcile_key(&self, key: &str) {
        match self.store.read(key) {
            Ok(_) => {
                if let Err(err) = self.load(key).await {
                    warn!("rebuilding endpoint {key} failed: {err:?}");
                }
            }
            Err(_) => self.remove(key),
        }
    }

    /// Watches the artifact directory until cancellation. Create and write
    /// events rebuild, removals and renames-away delete, renames-to create;
    /// a rename is observed as its effect on the named file.
    pub async fn watch(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                let Ok(event) = event else {
                    return;
                };
                for path in event.paths {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if name.starts_with('.') {
                        continue;
                    }
                    let _ = event_tx.send(name.to_string());
                }
            })?;
        watcher.watch(self.store.dir(), RecursiveMode::NonRecursive)?;
        info!("watching artifact directory {}", self.store.dir().display());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                key = event_rx.recv() => {
                    let Some(key) = key else {
                        break;
                    };
                    let mut pending: HashSet<String> = HashSet::new();
                    pending.insert(key);
                    // Debounce: gather everything that changes in the burst.
                    loop {
                        tokio::select! {
                            _ = sleep(DEBOUNCE) => break,
                            more = event_rx.recv() => {
                                match more {
                                    Some(key) => { pending.insert(key); },
                                    None => break,
                                }
                            }
                        }
                    }
                    for key in pending {
                        self.reconcile_key(&key).await;
                    }
                },
            }
        }
        Ok(())
    }
}
