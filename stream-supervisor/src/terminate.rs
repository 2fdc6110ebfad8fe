//! Stream teardown: stop the transcoder, then clear its output.
//!
//! The record has already been taken out of the registry when these run,
//! so nothing here touches the registry guard.

use std::path::Path;
use std::time::Duration;

use tokio::process::Child;

use crate::command::is_segment_file;
use crate::config::SupervisorConfig;
use crate::registry::StreamRecord;

/// Stop a record's process and delete its chunks and manifest.
///
/// Safe to call on a record whose process already exited.
pub async fn teardown(mut record: StreamRecord, config: &SupervisorConfig) {
    let id = record.spec.id.clone();
    terminate_process(&mut record.child, &id, config.stop_timeout()).await;
    let removed = remove_stream_output(&config.stream_dir(&id), &config.manifest_name).await;
    tracing::debug!(stream = %id, removed, "Stream output removed");
}

/// SIGTERM the process group, wait up to `timeout`, then SIGKILL and reap.
pub async fn terminate_process(child: &mut Child, id: &str, timeout: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(stream = %id, %status, "Transcoder already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(stream = %id, "Failed to poll transcoder: {}", e),
    }

    signal_group(child, GroupSignal::Terminate);

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(stream = %id, %status, "Transcoder exited");
        }
        Ok(Err(e)) => {
            tracing::warn!(stream = %id, "Failed waiting for transcoder: {}", e);
        }
        Err(_) => {
            tracing::warn!(
                stream = %id,
                "Transcoder ignored SIGTERM for {:?}, killing",
                timeout
            );
            // Group first, while the leader is unreaped and its pgid still ours
            signal_group(child, GroupSignal::Kill);
            if let Err(e) = child.kill().await {
                tracing::warn!(stream = %id, "Failed to kill transcoder: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: GroupSignal) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id() else {
        return;
    };
    let pid = Pid::from_raw(raw as i32);
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // Children are spawned as group leaders; fall back to the bare pid anyway
    if killpg(pid, signal).is_err() {
        let _ = kill(pid, signal);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: GroupSignal) {
    let _ = child.start_kill();
}

/// Delete chunk files and the manifest in `dir`, then the directory if it
/// ended up empty. Best-effort: errors are logged, never returned.
pub async fn remove_stream_output(dir: &Path, manifest_name: &str) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to list {}: {}", dir.display(), e);
                break;
            }
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name != manifest_name && !is_segment_file(&name) {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    // Fails harmlessly if anything else lives there
    let _ = tokio::fs::remove_dir(dir).await;
    removed
}
