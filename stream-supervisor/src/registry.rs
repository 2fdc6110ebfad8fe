//! Shared table of supervised streams.
//!
//! One mutex covers the whole table. It is never held across an await
//! point, so process signalling, waits and file I/O happen outside it.
//! Same-id lifecycle operations (start, stop, relaunch) are serialized by a
//! separate per-id async lock so a slow spawn never blocks other ids.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Child;

use crate::command::LaunchSpec;
use crate::diagnostics::DiagnosticTail;
use crate::quality::QualityProfile;

/// One supervised stream. Owns its transcoder process exclusively.
#[derive(Debug)]
pub struct StreamRecord {
    pub(crate) child: Child,
    pub pid: Option<u32>,
    pub spec: LaunchSpec,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub health_strikes: u32,
    pub reconnect_count: u32,
    /// Manifest path relative to the output root
    pub output_manifest_path: String,
    pub playlist_url: String,
    pub diagnostics: DiagnosticTail,
}

impl StreamRecord {
    /// Poll the child without blocking. `true` while it is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn snapshot(&mut self) -> StreamStatus {
        StreamStatus {
            stream_id: self.spec.id.clone(),
            uri: self.spec.source_uri.clone(),
            started_at: self.started_at,
            uptime: self.started.elapsed().as_secs_f64(),
            is_active: self.is_alive(),
            playlist_url: self.playlist_url.clone(),
            reconnect_count: self.reconnect_count,
            health_strike_count: self.health_strikes,
            pid: self.pid,
            quality: self.spec.quality,
        }
    }
}

/// Point-in-time view of a stream, safe to hand to the request layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    /// Credential-free source URI
    pub uri: String,
    pub started_at: DateTime<Utc>,
    /// Seconds since the current process was launched
    pub uptime: f64,
    pub is_active: bool,
    pub playlist_url: String,
    pub reconnect_count: u32,
    pub health_strike_count: u32,
    pub pid: Option<u32>,
    pub quality: QualityProfile,
}

/// A relaunch scheduled by recovery but not yet executed.
#[derive(Debug, Clone)]
pub(crate) struct PendingRelaunch {
    pub token: u64,
    pub spec: LaunchSpec,
    pub reconnect_count: u32,
}

/// What a health pass observed for one record, taken under the guard.
#[derive(Debug, Clone)]
pub(crate) struct Observation {
    pub id: String,
    pub alive: bool,
    pub started: Instant,
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<String, StreamRecord>,
    pending: HashMap<String, PendingRelaunch>,
    lifecycle: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    next_token: u64,
    closed: bool,
}

#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of one stream.
    pub fn get(&self, id: &str) -> Option<StreamStatus> {
        self.lock().records.get_mut(id).map(StreamRecord::snapshot)
    }

    /// Insert a record, returning whatever it replaced.
    ///
    /// Callers remove the previous record explicitly before launching, so
    /// a replacement here indicates a bug upstream; the old record is handed
    /// back so its process can still be terminated. Once the registry is
    /// closed the new record itself is handed back as the error.
    pub fn upsert(&self, record: StreamRecord) -> Result<Option<StreamRecord>, StreamRecord> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(record);
        }
        let id = record.spec.id.clone();
        Ok(inner.records.insert(id, record))
    }

    /// Take a record out of the table. The caller now owns its process.
    pub fn remove(&self, id: &str) -> Option<StreamRecord> {
        self.lock().records.remove(id)
    }

    /// Snapshots of every record, keyed by id.
    pub fn list(&self) -> BTreeMap<String, StreamStatus> {
        self.lock()
            .records
            .iter_mut()
            .map(|(id, record)| (id.clone(), record.snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` has a record or a scheduled relaunch.
    pub fn is_active(&self, id: &str) -> bool {
        let inner = self.lock();
        inner.records.contains_key(id) || inner.pending.contains_key(id)
    }

    /// `Some(true)` if the record exists and its process is running,
    /// `Some(false)` if it exists but the process has exited.
    pub fn is_alive(&self, id: &str) -> Option<bool> {
        self.lock().records.get_mut(id).map(StreamRecord::is_alive)
    }

    pub fn diagnostics(&self, id: &str) -> Option<Vec<String>> {
        self.lock().records.get(id).map(|r| r.diagnostics.lines())
    }

    /// Per-id lock serializing start/stop/relaunch for the same stream.
    pub(crate) fn lifecycle_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lock()
            .lifecycle
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Liveness and counters for every record, polled in one pass.
    pub(crate) fn observe(&self) -> Vec<Observation> {
        self.lock()
            .records
            .iter_mut()
            .map(|(id, record)| Observation {
                id: id.clone(),
                alive: record.is_alive(),
                started: record.started,
            })
            .collect()
    }

    /// Apply `f` to the record for `id`, but only if it is still the
    /// record launched at `started` (a relaunch in between makes it stale).
    pub(crate) fn update_if<F, T>(&self, id: &str, started: Instant, f: F) -> Option<T>
    where
        F: FnOnce(&mut StreamRecord) -> T,
    {
        let mut inner = self.lock();
        match inner.records.get_mut(id) {
            Some(record) if record.started == started => Some(f(record)),
            _ => None,
        }
    }

    /// Remove the record for `id` only if it is still the one launched at
    /// `started`.
    pub(crate) fn remove_if(&self, id: &str, started: Instant) -> Option<StreamRecord> {
        let mut inner = self.lock();
        let current = inner.records.get(id).is_some_and(|r| r.started == started);
        if current {
            inner.records.remove(id)
        } else {
            None
        }
    }

    /// Remove every record whose process has exited.
    pub(crate) fn remove_exited(&self) -> Vec<StreamRecord> {
        let mut inner = self.lock();
        let dead: Vec<String> = inner
            .records
            .iter_mut()
            .filter_map(|(id, record)| (!record.is_alive()).then(|| id.clone()))
            .collect();
        dead.iter()
            .filter_map(|id| inner.records.remove(id))
            .collect()
    }

    /// Close the registry to new records, cancel every scheduled relaunch
    /// and hand back every record.
    pub(crate) fn close(&self) -> Vec<StreamRecord> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.pending.clear();
        inner.records.drain().map(|(_, record)| record).collect()
    }

    /// Record a scheduled relaunch, returning its cancellation token.
    /// `None` once the registry is closed.
    pub(crate) fn schedule_relaunch(&self, spec: LaunchSpec, reconnect_count: u32) -> Option<u64> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        inner.next_token += 1;
        let token = inner.next_token;
        inner.pending.insert(
            spec.id.clone(),
            PendingRelaunch {
                token,
                spec,
                reconnect_count,
            },
        );
        Some(token)
    }

    /// Claim a scheduled relaunch. `None` if it was cancelled or replaced.
    pub(crate) fn take_relaunch(&self, id: &str, token: u64) -> Option<PendingRelaunch> {
        let mut inner = self.lock();
        let current = inner.pending.get(id).is_some_and(|p| p.token == token);
        if current {
            inner.pending.remove(id)
        } else {
            None
        }
    }

    /// Cancel a scheduled relaunch. Returns whether one was pending.
    pub(crate) fn cancel_relaunch(&self, id: &str) -> bool {
        self.lock().pending.remove(id).is_some()
    }

    #[cfg(test)]
    pub(crate) fn pending_relaunches(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    pub(crate) fn spec(id: &str) -> LaunchSpec {
        LaunchSpec {
            id: id.to_string(),
            source_uri: "rtsp://10.0.0.5/ch1".to_string(),
            credentials: None,
            quality: QualityProfile::Auto,
            max_bitrate_kbps: None,
        }
    }

    pub(crate) fn record(id: &str, program: &str, args: &[&str]) -> StreamRecord {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        StreamRecord {
            pid: child.id(),
            child,
            spec: spec(id),
            started_at: Utc::now(),
            started: Instant::now(),
            health_strikes: 0,
            reconnect_count: 0,
            output_manifest_path: format!("{}/stream.m3u8", id),
            playlist_url: format!("/streams/{}/stream.m3u8", id),
            diagnostics: DiagnosticTail::new(4),
        }
    }

    #[tokio::test]
    async fn test_upsert_get_remove() {
        let registry = StreamRegistry::new();
        assert!(registry.upsert(record("cam1", "sleep", &["30"])).unwrap().is_none());

        let status = registry.get("cam1").unwrap();
        assert_eq!(status.stream_id, "cam1");
        assert!(status.is_active);
        assert_eq!(status.playlist_url, "/streams/cam1/stream.m3u8");
        assert_eq!(status.reconnect_count, 0);

        assert!(registry.remove("cam1").is_some());
        assert!(registry.get("cam1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_covers_all_records() {
        let registry = StreamRegistry::new();
        registry.upsert(record("a", "sleep", &["30"])).unwrap();
        registry.upsert(record("b", "sleep", &["30"])).unwrap();

        let all = registry.list();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_remove_exited_only_takes_dead() {
        let registry = StreamRegistry::new();
        registry.upsert(record("live", "sleep", &["30"])).unwrap();
        registry.upsert(record("dead", "true", &[])).unwrap();

        // Let `true` exit
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let removed = registry.remove_exited();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].spec.id, "dead");
        assert!(registry.get("live").is_some());
    }

    #[tokio::test]
    async fn test_update_if_ignores_replaced_record() {
        let registry = StreamRegistry::new();
        let first = record("cam1", "sleep", &["30"]);
        let first_started = first.started;
        registry.upsert(first).unwrap();

        assert_eq!(registry.update_if("cam1", first_started, |r| r.health_strikes += 1), Some(()));

        registry.remove("cam1");
        let mut second = record("cam1", "sleep", &["30"]);
        second.started = first_started + std::time::Duration::from_millis(1);
        registry.upsert(second).unwrap();

        assert!(registry.update_if("cam1", first_started, |r| r.health_strikes += 1).is_none());
        assert_eq!(registry.get("cam1").unwrap().health_strike_count, 0);
    }

    #[tokio::test]
    async fn test_closed_registry_rejects_records() {
        let registry = StreamRegistry::new();
        registry.upsert(record("cam1", "sleep", &["30"])).unwrap();
        registry.schedule_relaunch(spec("cam2"), 1);

        let drained = registry.close();
        assert_eq!(drained.len(), 1);
        assert_eq!(registry.pending_relaunches(), 0);
        assert!(registry.upsert(record("cam3", "sleep", &["30"])).is_err());
        assert!(registry.schedule_relaunch(spec("cam3"), 1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_relaunch_tokens() {
        let registry = StreamRegistry::new();
        let token = registry.schedule_relaunch(spec("cam1"), 1).unwrap();
        assert!(registry.is_active("cam1"));

        // A newer schedule invalidates the old token
        let newer = registry.schedule_relaunch(spec("cam1"), 2).unwrap();
        assert!(registry.take_relaunch("cam1", token).is_none());

        let pending = registry.take_relaunch("cam1", newer).unwrap();
        assert_eq!(pending.reconnect_count, 2);
        assert!(!registry.is_active("cam1"));

        let token = registry.schedule_relaunch(spec("cam1"), 1).unwrap();
        assert!(registry.cancel_relaunch("cam1"));
        assert!(registry.take_relaunch("cam1", token).is_none());
    }
}
