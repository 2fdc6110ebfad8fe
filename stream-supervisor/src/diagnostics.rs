//! Bounded capture of transcoder stderr.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::credentials::redact_text;

/// Ring buffer of the most recent diagnostic lines from a child process.
///
/// Cloning shares the same buffer.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot of the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    /// Buffered lines joined with newlines.
    pub fn joined(&self) -> String {
        self.lines().join("\n")
    }

    /// Spawn a task that copies `reader` line by line into this tail.
    ///
    /// Lines are decoded lossily, so stray bytes in the output never stop
    /// the copy, and embedded URI passwords are masked. The task ends at EOF, i.e. when the child closes its
    /// stderr, or on a read error.
    pub fn spawn_reader<R>(&self, stream_id: String, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tail = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        let line = redact_text(line);
                        tracing::debug!(stream = %stream_id, "transcoder: {}", line);
                        tail.push(line);
                    }
                    Err(e) => {
                        tracing::debug!(stream = %stream_id, "stderr read failed: {}", e);
                        break;
                    }
                }
            }
        })
    }
}
