//! Removal of aged output left behind by streams that are no longer running.
//!
//! Everything here is best-effort: failures are logged and skipped.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::command::is_segment_file;
use crate::health::file_age;
use crate::supervisor::Shared;

/// Sweep every stream directory under the output root.
///
/// Directories of active streams (running, or waiting on a relaunch) are
/// never touched. Elsewhere, chunk files and manifests older than
/// `max_age` are deleted, and directories left empty are removed.
/// Returns the number of files deleted.
pub(crate) async fn cleanup_old_segments(shared: &Shared, max_age: Duration) -> usize {
    let root = &shared.config.output_root;
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("Failed to read output root {}: {}", root.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if shared.registry.is_active(&name) {
            continue;
        }

        removed += sweep_dir(&entry.path(), &shared.config.manifest_name, max_age).await;

        if is_empty_dir(&entry.path()).await {
            match tokio::fs::remove_dir(entry.path()).await {
                Ok(()) => tracing::debug!("Removed empty stream directory {}", entry.path().display()),
                Err(e) => tracing::warn!("Failed to remove {}: {}", entry.path().display(), e),
            }
        }
    }

    if removed > 0 {
        tracing::info!(removed, "Removed old stream output");
    }
    removed
}

async fn sweep_dir(dir: &Path, manifest_name: &str, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name != manifest_name && !is_segment_file(&name) {
            continue;
        }
        let path = entry.path();
        match file_age(&path).await {
            Some(age) if age > max_age => {}
            _ => continue,
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Removed old segment {}", path.display());
                removed += 1;
            }
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

async fn is_empty_dir(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// Spawn the periodic janitor. The first sweep runs immediately, clearing
/// leftovers from a previous run of the supervisor.
pub(crate) fn spawn_janitor(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.janitor_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cleanup_old_segments(&shared, shared.config.segment_max_age()).await;
        }
    })
}
