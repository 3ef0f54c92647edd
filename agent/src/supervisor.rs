//! Crash containment (`SPEC_FULL.md` B.5 item 4): the controller's own
//! long-running loops (heartbeat refresh, periodic housekeeping) are spawned
//! through [`supervise`] rather than bare `tokio::spawn`, so a panic inside
//! one restarts that loop instead of taking down the whole process — the
//! component crates' own internal tasks (bridge heartbeats, strategy ticks,
//! control-plane loops) already isolate panics the same way by virtue of
//! being separate `tokio::spawn`s; this is the same containment applied to
//! the controller's own glue code.
//!
//! Grounded on the teacher's `ToucanError::JoinError`, which is the error
//! this produces when a supervised future panics instead of returning.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use agent_audit::AuditLog;
use agent_types::Severity;
use futures::FutureExt;
use tracing::{error, info};

/// Minimum gap between restarts, so a task that panics immediately on every
/// start doesn't spin the CPU in a tight restart loop.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Spawns `make_future` in a loop: if the future it produces panics, a
/// security-severity audit event is recorded and a fresh future is spawned
/// after a short backoff. Returns immediately; the supervision loop itself
/// runs in its own task.
pub fn supervise<F, Fut>(name: &'static str, audit: AuditLog, mut make_future: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let outcome = AssertUnwindSafe(make_future()).catch_unwind().await;
            match outcome {
                Ok(()) => {
                    // The supervised future returned normally, which these
                    // loops are not expected to do; treat it the same as a
                    // crash so the task doesn't silently stop forever.
                    info!(task = name, "supervised task exited, restarting");
                }
                Err(panic) => {
                    let reason = panic_message(&panic);
                    error!(task = name, reason = %reason, "supervised task panicked, restarting");
                    let _ = audit
                        .append(
                            "supervisor.task_panicked",
                            serde_json::json!({ "task": name, "reason": reason }),
                            Severity::Security,
                        )
                        .await;
                }
            }
            tokio::time::sleep(RESTART_BACKOFF).await;
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn restarts_after_panic() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));

        let attempts_clone = attempts.clone();
        supervise("test-task", audit, move || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("boom");
                }
                // Second attempt: park forever so the loop doesn't spin.
                futures::future::pending::<()>().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }
}
