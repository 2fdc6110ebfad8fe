use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::Command;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::task::TaskTracker;

use crate::config::{StreamSpec, SupervisorConfig};
use crate::error::{ConfigError, SupervisorError};
use crate::health::{self, HealthReport};
use crate::janitor;
use crate::launcher::{self, StartOutcome};
use crate::registry::{StreamRegistry, StreamStatus};
use crate::terminate::teardown;

/// State shared by the supervisor handle and its background tasks.
pub(crate) struct Shared {
    pub config: SupervisorConfig,
    pub registry: StreamRegistry,
    /// In-flight recovery tasks, awaited on shutdown
    pub recoveries: TaskTracker,
}

impl Shared {
    pub(crate) fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            registry: StreamRegistry::new(),
            recoveries: TaskTracker::new(),
        }
    }
}

/// Supervises one transcoder process per stream id.
///
/// Cheap to clone; clones share the same registry and background tasks.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
}

impl Supervisor {
    /// Create a supervisor. Background tasks are not started until
    /// [`spawn_health_monitor`](Self::spawn_health_monitor) and
    /// [`spawn_janitor`](Self::spawn_janitor) are called.
    pub fn new(config: SupervisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.shared.registry
    }

    /// Start a stream, or return the running one for the same id.
    pub async fn start(&self, request: StreamSpec) -> Result<StartOutcome, SupervisorError> {
        launcher::start(&self.shared, request).await
    }

    /// Stop a stream and remove its output.
    ///
    /// Also cancels a relaunch that recovery has queued for the id.
    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let lock = self.shared.registry.lifecycle_lock(id);
        let _guard = lock.lock().await;

        let cancelled = self.shared.registry.cancel_relaunch(id);
        match self.shared.registry.remove(id) {
            Some(record) => {
                teardown(record, &self.shared.config).await;
                tracing::info!(stream = %id, "Stopped stream");
                Ok(())
            }
            None if cancelled => {
                tracing::info!(stream = %id, "Cancelled pending relaunch");
                Ok(())
            }
            None => {
                tracing::warn!(stream = %id, "Stream not found");
                Err(SupervisorError::NotFound(id.to_string()))
            }
        }
    }

    pub fn status(&self, id: &str) -> Option<StreamStatus> {
        self.shared.registry.get(id)
    }

    pub fn list(&self) -> BTreeMap<String, StreamStatus> {
        self.shared.registry.list()
    }

    /// Most recent stderr lines of a stream's transcoder.
    pub fn diagnostics(&self, id: &str) -> Option<Vec<String>> {
        self.shared.registry.diagnostics(id)
    }

    /// Remove every stream whose process has exited, without recovery.
    /// Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let count = health::reap_dead(&self.shared).await;
        if count > 0 {
            tracing::info!("Cleaned up {} dead stream(s)", count);
        }
        count
    }

    /// Delete aged output of inactive streams. Returns files deleted.
    pub async fn cleanup_old_segments(&self, max_age: Duration) -> usize {
        janitor::cleanup_old_segments(&self.shared, max_age).await
    }

    /// Run one health pass now.
    pub async fn check_health(&self) -> HealthReport {
        health::check_health(&self.shared).await
    }

    /// Start the periodic health monitor. Stopped by [`shutdown`](Self::shutdown).
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let handle = health::spawn_monitor(Arc::clone(&self.shared));
        self.track(&handle);
        handle
    }

    /// Start the periodic output janitor. Stopped by [`shutdown`](Self::shutdown).
    pub fn spawn_janitor(&self) -> JoinHandle<()> {
        let handle = janitor::spawn_janitor(Arc::clone(&self.shared));
        self.track(&handle);
        handle
    }

    fn track(&self, handle: &JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.abort_handle());
    }

    /// Stop background tasks and terminate every stream.
    ///
    /// Recoveries already in flight are awaited: one may be tearing down a
    /// record it took out of the registry, or finishing a relaunch that the
    /// closed registry will reject. After this returns no transcoder
    /// launched by this supervisor is running, and later starts fail with
    /// `ShuttingDown`.
    pub async fn shutdown(&self) {
        let tasks: Vec<AbortHandle> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        let records = self.shared.registry.close();
        let count = records.len();
        let recovering = self.shared.recoveries.len();
        self.shared.recoveries.close();
        tokio::join!(
            futures::future::join_all(
                records
                    .into_iter()
                    .map(|record| teardown(record, &self.shared.config)),
            ),
            self.shared.recoveries.wait(),
        );
        tracing::info!(recovering, "Stopped all {} streams", count);
    }

    /// Run the configured transcoder with `-version` and return the first
    /// line of its output.
    pub async fn check_transcoder(&self) -> Result<String, SupervisorError> {
        let config = &self.shared.config;
        let output = Command::new(&config.transcoder_path)
            .args(&config.transcoder_prefix_args)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::TranscoderNotFound(config.transcoder_path.display().to_string())
                } else {
                    SupervisorError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(SupervisorError::TranscoderCheck(format!(
                "{} -version exited with {}",
                config.transcoder_path.display(),
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }
}
