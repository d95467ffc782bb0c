use crate::errors::ErrorKind;
use crate::prelude::*;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Quiet period after a filesystem event before the config is re-read, so a
/// burst of writes coalesces into one reload.
pub const DEBOUNCE: Duration = Duration::from_millis(500);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One extra APIExport virtual workspace the listener should expose.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualWorkspace {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualWorkspacesConfig {
    #[serde(default)]
    pub virtual_workspaces: Vec<VirtualWorkspace>,
}

pub async fn load_config(path: &Path) -> Result<VirtualWorkspacesConfig> {
    let bytes = tokio::time::timeout(READ_TIMEOUT, tokio::fs::read(path))
        .await
        .map_err(|_| {
            ErrorKind::ConfigError(format!(
                "reading {} timed out after {READ_TIMEOUT:?}",
                path.display()
            ))
        })??;
    let config = serde_json::from_slice(&bytes)?;
    Ok(config)
}

/// Entries to create and keys to delete when moving between two config
/// states. An entry whose URL changed counts as an addition; its artifact is
/// rewritten in place.
pub fn diff_virtual_workspaces(
    old: &VirtualWorkspacesConfig,
    new: &VirtualWorkspacesConfig,
) -> (Vec<VirtualWorkspace>, Vec<String>) {
    let added = new
        .virtual_workspaces
        .iter()
        .filter(|entry| {
            old.virtual_workspaces
                .iter()
                .all(|prev| prev.name != entry.name || prev.url != entry.url)
        })
        .cloned()
        .collect();
    let removed = old
        .virtual_workspaces
        .iter()
        .filter(|prev| {
            new.virtual_workspaces
                .iter()
                .all(|entry| entry.name != prev.name)
        })
        .map(|prev| prev.name.clone())
        .collect();
    (added, removed)
}

/// Watches the config file and sends a freshly parsed config after every
/// debounced change. The initial state is sent immediately so the consumer
/// reconciles entries that existed before startup.
pub async fn watch_config(
    path: PathBuf,
    token: CancellationToken,
    updates: mpsc::Sender<VirtualWorkspacesConfig>,
) -> Result<()> {
    let initial = match load_config(&path).await {
        Ok(config) => config,
        Err(err) => {
            warn!("virtual workspace config {} unreadable: {err:?}", path.display());
            VirtualWorkspacesConfig::default()
        }
    };
    if updates.send(initial).await.is_err() {
        return Ok(());
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
    let file_name = path.file_name().map(|name| name.to_os_string());
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else {
                return;
            };
            let relevant = match &file_name {
                Some(name) => event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(name.as_os_str())),
                None => true,
            };
            if relevant {
                let _ = event_tx.send(());
            }
        })?;
    // Watch the parent so atomic replace-by-rename is observed too.
    let watch_root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;
    info!("watching virtual workspace config {}", path.display());

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = event_rx.recv() => {
                if event.is_none() {
                    break;
                }
                // Debounce: absorb the burst until the file stays quiet.
                loop {
                    tokio::select! {
                        _ = sleep(DEBOUNCE) => break,
                        more = event_rx.recv() => {
                            if more.is_none() {
                                break;
                            }
                        }
                    }
                }
                match load_config(&path).await {
                    Ok(config) => {
                        if updates.send(config).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("ignoring unreadable virtual workspace config: {err:?}");
                    }
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entries: &[(&str, &str)]) -> VirtualWorkspacesConfig {
        VirtualWorkspacesConfig {
            virtual_workspaces: entries
                .iter()
                .map(|(name, url)| VirtualWorkspace {
                    name: name.to_string(),
                    url: url.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn diff_reports_additions_removals_and_url_changes() {
        let old = config(&[
            ("compute", "https://kcp.example/services/apiexport/root/compute"),
            ("storage", "https://kcp.example/services/apiexport/root/storage"),
        ]);
        let new = config(&[
            ("compute", "https://kcp.example/services/apiexport/root:org/compute"),
            ("network", "https://kcp.example/services/apiexport/root/network"),
        ]);

        let (added, removed) = diff_virtual_workspaces(&old, &new);
        let added_names: Vec<&str> = added.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(added_names, vec!["compute", "network"]);
        assert_eq!(removed, vec!["storage".to_string()]);
    }

    #[test]
    fn diff_of_identical_configs_is_empty() {
        let state = config(&[("compute", "https://kcp.example/x")]);
        let (added, removed) = diff_virtual_workspaces(&state, &state);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn load_config_parses_camel_case_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("virtual-workspaces.json");
        tokio::fs::write(
            &path,
            serde_json::json!({
                "virtualWorkspaces": [
                    {"name": "compute", "url": "https://kcp.example/services/apiexport/root/compute"}
                ]
            })
            .to_string(),
        )
        .await
        .expect("write");

        let config = load_config(&path).await.expect("load");
        assert_eq!(config.virtual_workspaces.len(), 1);
        assert_eq!(config.virtual_workspaces[0].name, "compute");
    }
}
