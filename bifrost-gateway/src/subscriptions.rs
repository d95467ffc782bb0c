use crate::errors::GatewayError;
use crate::prelude::*;
use crate::resolvers::{value_at, ResourceInfo};

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher;
use kube::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bound of the channel between a watch and its SSE writer; a slow client
/// backpressures the watch instead of buffering unboundedly.
const SINK_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub namespace: Option<String>,
    /// Single-object mode: exact object name.
    pub name: Option<String>,
    /// Collection mode: label selector for the watch.
    pub label_selector: Option<String>,
    pub field_paths: Vec<String>,
    pub emit_only_field_changes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    Single,
    Collection,
}

/// What a subscription delivers per upstream event: the changed object, or
/// the full name-ordered snapshot for collection subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Object(Value),
    Snapshot(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchPhase {
    Opening,
    Streaming,
    Closed,
}

/// Opens a watch for one subscription and returns its emissions as a
/// stream. Dropping the stream closes the watch; a watch error is surfaced
/// as the final item before the stream ends.
pub fn watch_events(
    client: Client,
    resource: Arc<ResourceInfo>,
    filter: SubscriptionFilter,
    mode: SubscriptionMode,
) -> impl futures::Stream<Item = Result<Emission>> + Send + Unpin {
    let (tx, rx) = mpsc::channel::<Result<Emission>>(SINK_CAPACITY);

    tokio::spawn(async move {
        let mut phase = WatchPhase::Opening;
        let api = resource.api(client, filter.namespace.as_deref());
        let mut config = watcher::Config::default();
        if let Some(selector) = &filter.label_selector {
            config = config.labels(selector);
        }
        if let Some(name) = &filter.name {
            config = config.fields(&format!("metadata.name={name}"));
        }

        let mut state = SubscriptionState::default();
        let mut stream = watcher(api, config).boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if phase == WatchPhase::Opening {
                        phase = WatchPhase::Streaming;
                        debug!("subscription watch streaming for {}", resource.plural);
                    }
                    for emission in state.handle(event, &filter, mode) {
                        if tx.send(Ok(emission)).await.is_err() {
                            // Sink dropped: client went away, close the watch.
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!("subscription watch for {} failed: {err:?}", resource.plural);
                    let _ = tx
                        .send(Err(GatewayError::watch(format!(
                            "watch terminated: {err}"
                        ))))
                        .await;
                    phase = WatchPhase::Closed;
                    break;
                }
            }
        }
        if phase != WatchPhase::Closed {
            debug!("subscription watch for {} closed", resource.plural);
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// In-memory view of the watched objects, keyed `namespace/name`.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionState {
    objects: BTreeMap<String, Value>,
}

impl SubscriptionState {
    pub(crate) fn handle(
        &mut self,
        event: watcher::Event<DynamicObject>,
        filter: &SubscriptionFilter,
        mode: SubscriptionMode,
    ) -> Vec<Emission> {
        match event {
            watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
                self.applied(object, filter, mode)
            }
            watcher::Event::Delete(object) => self.deleted(object, filter, mode),
            watcher::Event::Init | watcher::Event::InitDone => Vec::new(),
        }
    }

    fn applied(
        &mut self,
        object: DynamicObject,
        filter: &SubscriptionFilter,
        mode: SubscriptionMode,
    ) -> Vec<Emission> {
        let Some((key, value)) = keyed_value(&object) else {
            return Vec::new();
        };
        if !matches_name(filter, &value) {
            return Vec::new();
        }

        let prior = self.objects.insert(key, value.clone());
        // A modification that leaves every watched field untouched is
        // suppressed; additions always emit.
        if let Some(prior) = prior {
            if filter.emit_only_field_changes
                && !filter.field_paths.is_empty()
                && fields_equal(&prior, &value, &filter.field_paths)
            {
                return Vec::new();
            }
        }
        self.emit(value, mode)
    }

    fn deleted(
        &mut self,
        object: DynamicObject,
        filter: &SubscriptionFilter,
        mode: SubscriptionMode,
    ) -> Vec<Emission> {
        let Some((key, value)) = keyed_value(&object) else {
            return Vec::new();
        };
        if !matches_name(filter, &value) {
            return Vec::new();
        }
        self.objects.remove(&key);
        self.emit(value, mode)
    }

    fn emit(&self, value: Value, mode: SubscriptionMode) -> Vec<Emission> {
        match mode {
            SubscriptionMode::Single => vec![Emission::Object(value)],
            SubscriptionMode::Collection => {
                vec![Emission::Snapshot(self.objects.values().cloned().collect())]
            }
        }
    }
}

fn keyed_value(object: &DynamicObject) -> Option<(String, Value)> {
    let value = serde_json::to_value(object).ok()?;
    let name = value.pointer("/metadata/name")?.as_str()?.to_string();
    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or("");
    Some((format!("{namespace}/{name}"), value))
}

fn matches_name(filter: &SubscriptionFilter, value: &Value) -> bool {
    let Some(wanted) = &filter.name else {
        return true;
    };
    value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(|name| name == wanted)
        .unwrap_or(false)
}

/// Deep equality over the listed paths. A path missing on both sides counts
/// as unchanged; present on one side only counts as changed.
fn fields_equal(prior: &Value, current: &Value, paths: &[String]) -> bool {
    paths
        .iter()
        .all(|path| value_at(prior, path) == value_at(current, path))
}
