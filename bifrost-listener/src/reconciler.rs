use crate::prelude::*;

use futures::{StreamExt, TryStreamExt};
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Resource;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_RECONCILE_ATTEMPTS: u32 = 5;

/// A watch event after flattening the watcher's init protocol: the initial
/// listing surfaces as `Applied` per object.
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Applied(K),
    Deleted(K),
}

/// Exponential backoff delay for reconcile attempt `attempt` (zero-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let capped = attempt.min(6);
    Duration::from_secs(1 << capped)
}

/// Runs `handler` for every event of a watch until cancellation.
///
/// Stream-level failures restart the watch with the watcher's default
/// backoff. Handler failures are retried with exponential backoff; an event
/// that keeps failing is dropped with a warning so one broken object cannot
/// wedge the loop. Reconcile work is idempotent, so the periodic watch
/// restarts re-deliver anything that was dropped.
pub async fn run_event_loop<K, F, Fut>(
    api: Api<K>,
    config: watcher::Config,
    token: CancellationToken,
    mut handler: F,
) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(ResourceEvent<K>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut stream = watcher(api, config).default_backoff().boxed();
    let mut processed: usize = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                break;
            },
            event = stream.try_next() => {
                let event = match event {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("watch stream error: {err:?}");
                        continue;
                    }
                };
                let event = match event {
                    watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                        ResourceEvent::Applied(obj)
                    }
                    watcher::Event::Delete(obj) => ResourceEvent::Deleted(obj),
                    watcher::Event::Init | watcher::Event::InitDone => continue,
                };
                handle_with_retries(&mut handler, event, &token).await;
                processed += 1;
            },
        }
    }
    info!("event loop stopped after {processed} events");
    Ok(())
}

async fn handle_with_retries<K, F, Fut>(
    handler: &mut F,
    event: ResourceEvent<K>,
    token: &CancellationToken,
) where
    K: Clone + Debug,
    F: FnMut(ResourceEvent<K>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for attempt in 0..MAX_RECONCILE_ATTEMPTS {
        match handler(event.clone()).await {
            Ok(()) => return,
            Err(err) => {
                let delay = backoff_delay(attempt);
                warn!(
                    "reconcile attempt {} failed: {err:?}, retrying in {delay:?}",
                    attempt + 1
                );
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    warn!("dropping event after {MAX_RECONCILE_ATTEMPTS} failed attempts: {event:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(64));
        assert_eq!(backoff_delay(60), Duration::from_secs(64));
    }
}
