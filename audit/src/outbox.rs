//! Durable outbound outcome queue (§4.5 "Outcome reporting", §6 `outbox.log`).
//!
//! Entries are appended to `outbox.log` as they're produced and removed
//! (by rewriting the file) once the control-plane link acknowledges them.
//! On restart the whole file is the replay set: every entry still present
//! is resent until acknowledged.

use std::path::{Path, PathBuf};

use agent_types::{CommandId, CommandKind};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AuditError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    pub command_id: CommandId,
    pub command_kind: CommandKind,
    pub kind: String,
    pub payload: serde_json::Value,
}

pub struct Outbox {
    path: PathBuf,
    entries: Mutex<Vec<OutboxEntry>>,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").field("path", &self.path).finish()
    }
}

impl Outbox {
    /// Loads the outbox from `path`, treating every entry still on disk as
    /// unacknowledged (the replay set the control-plane link retries).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| serde_json::from_str::<OutboxEntry>(l).map_err(AuditError::from))
                .collect::<Result<Vec<_>, _>>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Enqueues an outcome for upstream reporting, persisting it before
    /// returning.
    pub async fn push(&self, entry: OutboxEntry) -> Result<(), AuditError> {
        let mut entries = self.entries.lock().await;
        entries.push(entry);
        self.persist(&entries).await
    }

    /// Snapshot of everything still unacknowledged, in enqueue order — the
    /// replay set on restart and the retry set in steady state.
    pub async fn pending(&self) -> Vec<OutboxEntry> {
        self.entries.lock().await.clone()
    }

    /// Removes `command_id` from the queue. Idempotent: acknowledging an id
    /// that isn't present (a duplicate ack) is a no-op, matching the
    /// "duplicate sends by the server must be idempotent" requirement.
    pub async fn acknowledge(&self, command_id: CommandId) -> Result<(), AuditError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.command_id != command_id);
        if entries.len() != before {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn persist(&self, entries: &[OutboxEntry]) -> Result<(), AuditError> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        let tmp = self.path.with_extension("log.tmp");
        tokio::fs::write(&tmp, &buf).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u8) -> OutboxEntry {
        OutboxEntry {
            command_id: CommandId::new(),
            command_kind: CommandKind::Ping,
            kind: "executed".into(),
            payload: serde_json::json!({"n": n}),
        }
    }

    #[tokio::test]
    async fn acknowledge_removes_only_the_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        let outbox = Outbox::load(&path).await.unwrap();

        let keep = entry(1);
        let drop_me = entry(2);
        outbox.push(keep.clone()).await.unwrap();
        outbox.push(drop_me.clone()).await.unwrap();

        outbox.acknowledge(drop_me.command_id).await.unwrap();
        let pending = outbox.pending().await;
        assert_eq!(pending, vec![keep]);
    }

    #[tokio::test]
    async fn reload_replays_unacknowledged_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.log");
        let outbox = Outbox::load(&path).await.unwrap();
        outbox.push(entry(1)).await.unwrap();

        let reloaded = Outbox::load(&path).await.unwrap();
        assert_eq!(reloaded.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_acknowledge_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::load(dir.path().join("outbox.log")).await.unwrap();
        let e = entry(1);
        outbox.push(e.clone()).await.unwrap();
        outbox.acknowledge(e.command_id).await.unwrap();
        outbox.acknowledge(e.command_id).await.unwrap();
        assert!(outbox.pending().await.is_empty());
    }
}
