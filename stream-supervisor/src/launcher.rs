use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::process::Command;

use crate::command::{transcoder_args, LaunchSpec};
use crate::config::StreamSpec;
use crate::credentials::split_credentials;
use crate::diagnostics::DiagnosticTail;
use crate::error::SupervisorError;
use crate::registry::StreamRecord;
use crate::supervisor::Shared;
use crate::terminate::{remove_stream_output, teardown, terminate_process};

/// How long to wait for the stderr reader after an early exit.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub stream_id: String,
    pub playlist_url: String,
    pub already_running: bool,
    /// Uptime of the existing process when `already_running`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<f64>,
}

/// Validate a stream id for use as a directory name.
/// Ids must be 1-64 chars, alphanumeric plus dash/underscore, starting with
/// an alphanumeric.
pub fn is_valid_stream_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 64 {
        return false;
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return false;
    }
    id.chars().next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
}

impl LaunchSpec {
    /// Normalize a start request: scrub the URI and keep any credentials it
    /// embedded unless explicit ones were given.
    pub fn from_request(request: StreamSpec) -> Self {
        let (source_uri, embedded) = split_credentials(&request.source_uri);
        Self {
            id: request.id,
            source_uri,
            credentials: request.credentials.or(embedded),
            quality: request.quality,
            max_bitrate_kbps: request.max_bitrate_kbps,
        }
    }
}

/// Start a stream, or report the one already running under the same id.
pub(crate) async fn start(shared: &Shared, request: StreamSpec) -> Result<StartOutcome, SupervisorError> {
    if !is_valid_stream_id(&request.id) {
        return Err(SupervisorError::InvalidStreamId(request.id));
    }
    let spec = LaunchSpec::from_request(request);
    let id = spec.id.clone();

    let lock = shared.registry.lifecycle_lock(&id);
    let _guard = lock.lock().await;

    match shared.registry.is_alive(&id) {
        Some(true) => {
            if let Some(status) = shared.registry.get(&id) {
                tracing::info!(stream = %id, "Stream already running, reusing it");
                return Ok(StartOutcome {
                    stream_id: id,
                    playlist_url: status.playlist_url,
                    already_running: true,
                    uptime: Some(status.uptime),
                });
            }
        }
        Some(false) => {
            tracing::info!(stream = %id, "Cleaning up dead stream before restart");
            if let Some(record) = shared.registry.remove(&id) {
                teardown(record, &shared.config).await;
            }
        }
        None => {}
    }

    // An explicit start supersedes any relaunch recovery had queued
    if shared.registry.cancel_relaunch(&id) {
        tracing::debug!(stream = %id, "Cancelled pending relaunch");
    }

    let playlist_url = launch(shared, spec, 0).await?;
    Ok(StartOutcome {
        stream_id: id,
        playlist_url,
        already_running: false,
        uptime: None,
    })
}

/// Spawn the transcoder for `spec` and register it.
///
/// The caller holds the id's lifecycle lock and has already removed any
/// previous record. Returns the playlist URL.
pub(crate) async fn launch(
    shared: &Shared,
    spec: LaunchSpec,
    reconnect_count: u32,
) -> Result<String, SupervisorError> {
    let config = &shared.config;
    let id = spec.id.clone();
    let stream_dir = config.stream_dir(&id);

    // Stale chunks from a previous run would be served mixed with new ones
    remove_stream_output(&stream_dir, &config.manifest_name).await;
    tokio::fs::create_dir_all(&stream_dir).await?;

    tracing::info!(
        stream = %id,
        source = %spec.source_uri,
        quality = %spec.quality,
        reconnect_count,
        "Starting transcoder"
    );

    let mut command = Command::new(&config.transcoder_path);
    command
        .args(&config.transcoder_prefix_args)
        .args(transcoder_args(config, &spec))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so termination reaches anything the transcoder forks
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SupervisorError::TranscoderNotFound(config.transcoder_path.display().to_string())
        } else {
            SupervisorError::Spawn(e)
        }
    })?;

    let diagnostics = DiagnosticTail::new(config.diagnostic_lines);
    let reader = child
        .stderr
        .take()
        .map(|stderr| diagnostics.spawn_reader(id.clone(), stderr));

    tokio::time::sleep(config.spawn_grace()).await;

    match child.try_wait() {
        Ok(None) => {}
        Ok(Some(status)) => {
            if let Some(reader) = reader {
                let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, reader).await;
            }
            remove_stream_output(&stream_dir, &config.manifest_name).await;
            let diagnostics = diagnostics.joined();
            tracing::warn!(stream = %id, %status, "Transcoder exited immediately: {}", diagnostics);
            return Err(SupervisorError::ImmediateExit { status, diagnostics });
        }
        Err(e) => {
            terminate_process(&mut child, &id, config.stop_timeout()).await;
            return Err(SupervisorError::Io(e));
        }
    }

    let playlist_url = config.playlist_url(&id);
    let record = StreamRecord {
        pid: child.id(),
        child,
        spec,
        started_at: Utc::now(),
        started: Instant::now(),
        health_strikes: 0,
        reconnect_count,
        output_manifest_path: config.relative_manifest(&id),
        playlist_url: playlist_url.clone(),
        diagnostics,
    };

    tracing::info!(stream = %id, pid = ?record.pid, "Transcoder running");

    match shared.registry.upsert(record) {
        Ok(None) => {}
        Ok(Some(mut previous)) => {
            tracing::warn!(stream = %id, "Replaced a record that was never removed");
            terminate_process(&mut previous.child, &id, config.stop_timeout()).await;
        }
        Err(rejected) => {
            tracing::info!(stream = %id, "Supervisor shutting down, discarding new transcoder");
            teardown(rejected, config).await;
            return Err(SupervisorError::ShuttingDown);
        }
    }

    Ok(playlist_url)
}
