//! Append-only audit log (§4.7, §6 `audit.log`).
//!
//! Writes are batched with a max 50 ms group-commit window: the first
//! `append` in an idle period opens a batch, subsequent appends join it until
//! the window elapses, then every event in the batch is written and the file
//! is `fsync`ed exactly once before any caller is acknowledged. `seq` is
//! assigned in append order, so the order callers observe acknowledgment in
//! is the order `seq` was handed out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_types::{AsyncShutdown, AuditEvent, Severity};
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Instant};

use crate::error::AuditError;

const GROUP_COMMIT_WINDOW: Duration = Duration::from_millis(50);
const MAX_BATCH: usize = 256;
const ROTATE_BYTES: u64 = 5 * 1024 * 1024;
const CHANNEL_CAPACITY: usize = 1024;

struct Envelope {
    event: AuditEvent,
    ack: oneshot::Sender<Result<AuditEvent, AuditError>>,
}

/// Handle to the audit log. Cheap to clone: every clone shares the same
/// background writer task and the same `seq` counter.
#[derive(Clone)]
pub struct AuditLog {
    next_seq: Arc<AtomicU64>,
    sender: mpsc::Sender<Envelope>,
    writer: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Opens (or creates) the audit log at `path`, recovering the highest
    /// persisted `seq` by scanning existing records.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let (highest_seq, existing_len) = recover(&path).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(writer_task(file, path, existing_len, receiver));

        Ok(Self {
            next_seq: Arc::new(AtomicU64::new(highest_seq + 1)),
            sender,
            writer: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Appends a new event, blocking until it has been durably written
    /// (fsynced) and returning the event with its assigned `seq`.
    pub async fn append(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
        severity: Severity,
    ) -> Result<AuditEvent, AuditError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = AuditEvent::new(seq, Utc::now(), kind.into(), payload, severity);

        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender
            .send(Envelope {
                event,
                ack: ack_tx,
            })
            .await
            .map_err(|_| AuditError::Closed)?;

        ack_rx.await.map_err(|_| AuditError::Closed)?
    }

    /// Convenience wrapper for the mandatory skip-observability trail (§4.4
    /// item 6): records a DEBUG event tagged `skip:<reason>`.
    pub async fn record_skip(
        &self,
        strategy_id: &str,
        reason: &str,
    ) -> Result<AuditEvent, AuditError> {
        self.append(
            format!("skip:{reason}"),
            serde_json::json!({ "strategyId": strategy_id, "reason": reason }),
            Severity::Debug,
        )
        .await
    }

}

impl AsyncShutdown for AuditLog {
    type Result = ();

    /// Drops this handle's sender and joins the writer task once every
    /// other clone has done the same. The main controller owns component
    /// handles exclusively (§4.5 "Ownership & lifecycle"): it must shut down
    /// every component that holds an `AuditLog` clone before shutting down
    /// the log itself, otherwise this future waits on senders it cannot see.
    fn shutdown(&mut self) -> impl std::future::Future<Output = Self::Result> + Send {
        async move {
            let (dead_tx, _) = mpsc::channel(1);
            self.sender = dead_tx;
            if let Some(handle) = self.writer.lock().await.take() {
                let _ = handle.await;
            }
        }
    }
}

/// Scans an existing audit log file for the highest persisted `seq`,
/// tolerating (and logging) a truncated trailing record from a crash
/// mid-write.
async fn recover(path: &PathBuf) -> Result<(u64, u64), AuditError> {
    let mut file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e.into()),
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;

    let mut highest = 0u64;
    let last_line = contents.lines().count().saturating_sub(1);
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEvent>(line) {
            Ok(event) => highest = highest.max(event.seq),
            Err(e) => {
                // A corrupt trailing line is expected after a crash between
                // write and fsync; anywhere else it's a real problem.
                if idx == last_line {
                    tracing::warn!(line = idx, error = %e, "discarding truncated trailing audit record");
                } else {
                    return Err(AuditError::RecoveryCorrupt {
                        line: idx,
                        detail: e.to_string(),
                    });
                }
            }
        }
    }

    Ok((highest, contents.len() as u64))
}

async fn writer_task(
    mut file: File,
    path: PathBuf,
    initial_len: u64,
    mut receiver: mpsc::Receiver<Envelope>,
) {
    let mut current_len = initial_len;

    while let Some(first) = receiver.recv().await {
        let mut batch = vec![first];
        let deadline = Instant::now() + GROUP_COMMIT_WINDOW;

        while batch.len() < MAX_BATCH {
            match timeout(
                deadline.saturating_duration_since(Instant::now()),
                receiver.recv(),
            )
            .await
            {
                Ok(Some(env)) => batch.push(env),
                Ok(None) => break,
                Err(_) => break, // window elapsed
            }
        }

        let outcome = flush_batch(&mut file, &mut current_len, &batch).await;

        if outcome.is_ok() && current_len >= ROTATE_BYTES {
            match rotate(&path).await {
                Ok(new_file) => {
                    file = new_file;
                    current_len = 0;
                }
                Err(e) => {
                    tracing::error!(error = %e, "audit log rotation failed, continuing on current file");
                }
            }
        }

        for env in batch {
            let reply = match &outcome {
                Ok(()) => Ok(env.event),
                Err(message) => Err(AuditError::WriteFailed(message.clone())),
            };
            let _ = env.ack.send(reply);
        }
    }
}

async fn flush_batch(
    file: &mut File,
    current_len: &mut u64,
    batch: &[Envelope],
) -> Result<(), String> {
    let mut buf = Vec::new();
    for env in batch {
        serde_json::to_writer(&mut buf, &env.event).map_err(|e| e.to_string())?;
        buf.push(b'\n');
    }
    file.write_all(&buf).await.map_err(|e| e.to_string())?;
    file.flush().await.map_err(|e| e.to_string())?;
    file.sync_all().await.map_err(|e| e.to_string())?;
    *current_len += buf.len() as u64;
    Ok(())
}

async fn rotate(path: &Path) -> Result<File, AuditError> {
    let mut suffix = 1u32;
    loop {
        let candidate = path.with_extension(format!("log.{suffix}"));
        if !candidate.exists() {
            break;
        }
        suffix += 1;
    }
    // Shift the chain upward so `.1` is always the most recently rotated
    // file, preserving the retained suffix chain in order.
    let mut n = suffix;
    while n > 1 {
        let from = path.with_extension(format!("log.{}", n - 1));
        let to = path.with_extension(format!("log.{n}"));
        tokio::fs::rename(&from, &to).await?;
        n -= 1;
    }
    tokio::fs::rename(path, path.with_extension("log.1")).await?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(AuditError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seq_is_strictly_increasing_and_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        let log = AuditLog::open(&path).await.unwrap();
        let e1 = log
            .append("order.accepted", serde_json::json!({"id": 1}), Severity::Info)
            .await
            .unwrap();
        let e2 = log
            .append("order.accepted", serde_json::json!({"id": 2}), Severity::Info)
            .await
            .unwrap();
        assert_eq!(e1.seq + 1, e2.seq);

        let reopened = AuditLog::open(&path).await.unwrap();
        let e3 = reopened
            .append("order.accepted", serde_json::json!({"id": 3}), Severity::Info)
            .await
            .unwrap();
        assert!(e3.seq > e2.seq);
    }

    #[tokio::test]
    async fn record_skip_tags_the_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let event = log.record_skip("strat-1", "cooldown").await.unwrap();
        assert_eq!(event.kind, "skip:cooldown");
        assert_eq!(event.severity, Severity::Debug);
    }
}
