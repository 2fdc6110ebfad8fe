//! Bounded-retry restart of failed streams.
//!
//! A recovery runs as its own task: it tears the failed record down, then
//! relaunches after `restart_delay`. Between the two, the id has no record
//! but a pending relaunch, which `stop` and `start` can cancel.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::command::LaunchSpec;
use crate::credentials::strip_credentials;
use crate::launcher::launch;
use crate::supervisor::Shared;
use crate::terminate::teardown;

/// Recover the record for `id` launched at `started`.
///
/// Does nothing if that record is already gone (stopped, or recovered by an
/// earlier pass). The task is tracked so shutdown can wait for it.
pub(crate) fn recover(shared: Arc<Shared>, id: String, started: Instant) -> JoinHandle<()> {
    let tracker = shared.recoveries.clone();
    tracker.spawn(async move { run_recovery(shared, id, started).await })
}

async fn run_recovery(shared: Arc<Shared>, id: String, started: Instant) {
    let lock = shared.registry.lifecycle_lock(&id);

    let mut token = {
        let _guard = lock.lock().await;
        let Some(record) = shared.registry.remove_if(&id, started) else {
            tracing::debug!(stream = %id, "Record already replaced, skipping recovery");
            return;
        };
        let spec = record.spec.clone();
        let reconnect_count = record.reconnect_count;
        teardown(record, &shared.config).await;

        match schedule_next(&shared, spec, reconnect_count) {
            Some(token) => token,
            None => return,
        }
    };

    loop {
        tokio::time::sleep(shared.config.restart_delay()).await;

        let _guard = lock.lock().await;
        let Some(pending) = shared.registry.take_relaunch(&id, token) else {
            tracing::debug!(stream = %id, "Relaunch cancelled");
            return;
        };
        let attempt = pending.reconnect_count;

        match launch(&shared, pending.spec.clone(), attempt).await {
            Ok(_) => {
                tracing::info!(
                    stream = %id,
                    attempt,
                    max = shared.config.max_reconnect_attempts,
                    "Stream recovered"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(stream = %id, attempt, "Relaunch failed: {}", e);
                token = match schedule_next(&shared, pending.spec, attempt) {
                    Some(token) => token,
                    None => return,
                };
            }
        }
    }
}

/// Queue the next relaunch, or give up once the attempt budget is spent.
fn schedule_next(shared: &Shared, mut spec: LaunchSpec, reconnect_count: u32) -> Option<u64> {
    let max = shared.config.max_reconnect_attempts;
    if reconnect_count >= max {
        tracing::warn!(
            stream = %spec.id,
            reconnect_count,
            "Recovery exhausted, stream removed until started again"
        );
        return None;
    }

    // Never let a credential fragment ride along into the next command line
    spec.source_uri = strip_credentials(&spec.source_uri);
    let next = reconnect_count + 1;
    tracing::info!(
        stream = %spec.id,
        attempt = next,
        max,
        delay = ?shared.config.restart_delay(),
        "Scheduling relaunch"
    );
    let token = shared.registry.schedule_relaunch(spec, next);
    if token.is_none() {
        tracing::debug!("Supervisor shutting down, relaunch dropped");
    }
    token
}
