//! Periodic health classification of supervised streams.
//!
//! Two independent signals are checked: whether the transcoder process is
//! still alive, and whether its manifest keeps being rewritten. A process
//! can stay alive while its source connection is wedged, so liveness alone
//! is not enough.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::recovery;
use crate::supervisor::Shared;
use crate::terminate::teardown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamHealth {
    /// Running and producing output, or still inside the startup window
    Healthy,
    /// Manifest exists but has not been rewritten recently
    Stale,
    /// Process has exited
    Dead,
    /// No manifest after the startup grace window
    NeverStarted,
}

/// Classify one stream from its observed signals.
///
/// `manifest_age` is `None` when the manifest does not exist.
pub fn classify(
    alive: bool,
    manifest_age: Option<Duration>,
    since_start: Duration,
    config: &SupervisorConfig,
) -> StreamHealth {
    if !alive {
        return StreamHealth::Dead;
    }
    match manifest_age {
        None if since_start > config.startup_grace() => StreamHealth::NeverStarted,
        None => StreamHealth::Healthy,
        Some(age) if age > config.stale_after() => StreamHealth::Stale,
        Some(_) => StreamHealth::Healthy,
    }
}

/// Age of the file at `path`, or `None` if it cannot be stat'ed.
pub async fn file_age(path: &Path) -> Option<Duration> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default(),
    )
}

/// Outcome of one health pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub streams: BTreeMap<String, StreamHealth>,
    /// Ids handed to recovery during this pass
    pub recovering: Vec<String>,
}

/// Run one health pass over every record.
///
/// Recovery is dispatched as separate tasks, so a slow relaunch never holds
/// up the scan of other streams.
pub(crate) async fn check_health(shared: &Arc<Shared>) -> HealthReport {
    let config = &shared.config;
    let mut report = HealthReport::default();

    for obs in shared.registry.observe() {
        let manifest_age = if obs.alive {
            file_age(&config.manifest_path(&obs.id)).await
        } else {
            None
        };
        let health = classify(obs.alive, manifest_age, obs.started.elapsed(), config);

        let escalate = match health {
            StreamHealth::Healthy => {
                shared
                    .registry
                    .update_if(&obs.id, obs.started, |r| r.health_strikes = 0);
                false
            }
            StreamHealth::Stale => {
                let strikes = shared.registry.update_if(&obs.id, obs.started, |r| {
                    r.health_strikes += 1;
                    r.health_strikes
                });
                match strikes {
                    Some(strikes) => {
                        tracing::warn!(
                            stream = %obs.id,
                            strikes,
                            age = ?manifest_age,
                            "Stream output is stale"
                        );
                        strikes > config.max_health_strikes
                    }
                    None => false,
                }
            }
            StreamHealth::Dead => {
                tracing::warn!(stream = %obs.id, "Transcoder process died");
                true
            }
            StreamHealth::NeverStarted => {
                tracing::warn!(
                    stream = %obs.id,
                    "No manifest after {:?}, transcoder never started",
                    config.startup_grace()
                );
                true
            }
        };

        if escalate {
            recovery::recover(Arc::clone(shared), obs.id.clone(), obs.started);
            report.recovering.push(obs.id.clone());
        }
        report.streams.insert(obs.id, health);
    }

    report
}

/// Tear down every record whose process has exited, without recovery.
pub(crate) async fn reap_dead(shared: &Shared) -> usize {
    let dead = shared.registry.remove_exited();
    let count = dead.len();
    for record in &dead {
        tracing::warn!(stream = %record.spec.id, "Cleaning up dead stream");
    }
    futures::future::join_all(dead.into_iter().map(|record| teardown(record, &shared.config))).await;
    count
}

/// Spawn the periodic health monitor.
pub(crate) fn spawn_monitor(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = check_health(&shared).await;
            if !report.recovering.is_empty() {
                tracing::info!(streams = ?report.recovering, "Health check scheduled recovery");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> SupervisorConfig {
        SupervisorConfig::new(PathBuf::from("/tmp/unused"))
    }

    #[test]
    fn test_dead_wins_over_everything() {
        let c = config();
        assert_eq!(
            classify(false, Some(Duration::ZERO), Duration::ZERO, &c),
            StreamHealth::Dead
        );
        assert_eq!(classify(false, None, Duration::from_secs(60), &c), StreamHealth::Dead);
    }

    #[test]
    fn test_missing_manifest_within_grace_is_healthy() {
        let c = config();
        assert_eq!(classify(true, None, Duration::from_secs(29), &c), StreamHealth::Healthy);
        assert_eq!(
            classify(true, None, Duration::from_secs(31), &c),
            StreamHealth::NeverStarted
        );
    }

    #[test]
    fn test_stale_threshold() {
        let c = config();
        assert_eq!(
            classify(true, Some(Duration::from_secs(1)), Duration::from_secs(60), &c),
            StreamHealth::Healthy
        );
        assert_eq!(
            classify(true, Some(Duration::from_secs(4)), Duration::from_secs(60), &c),
            StreamHealth::Stale
        );
    }

    #[tokio::test]
    async fn test_file_age() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stream.m3u8");
        assert!(file_age(&path).await.is_none());

        std::fs::write(&path, "#EXTM3U").unwrap();
        let age = file_age(&path).await.unwrap();
        assert!(age < Duration::from_secs(5));
    }
}
