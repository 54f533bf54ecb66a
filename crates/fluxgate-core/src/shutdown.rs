//! Coordinated shutdown.
//!
//! Components receive child cancellation tokens and select on them in every
//! long-lived loop; the composition root registers its top-level tasks so
//! shutdown can wait for a bounded drain.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drain poll interval.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Fans a cancellation signal out to every coordinator task.
pub struct ShutdownController {
    cancel_token: CancellationToken,
    active_tasks: AtomicU32,
}

impl ShutdownController {
    /// Create a controller.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            active_tasks: AtomicU32::new(0),
        })
    }

    /// Get a cancellation token for a component.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Track a long-lived task; hold the guard for the task's lifetime.
    #[must_use]
    pub fn register_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: self.clone(),
        }
    }

    /// Number of registered tasks still running.
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Cancel every token and wait up to `timeout` for registered tasks to
    /// finish.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("shutdown requested");
        self.cancel_token.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_task_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.active_task_count(),
                    "drain timeout, abandoning tasks"
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        info!("all tasks drained");
    }
}

/// Decrements the active-task count when dropped.
pub struct TaskGuard {
    controller: Arc<ShutdownController>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.controller.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_are_cancelled_on_shutdown() {
        let shutdown = ShutdownController::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        shutdown.shutdown(Duration::from_millis(100)).await;
        assert!(token.is_cancelled());
        assert!(shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn shutdown_waits_for_registered_tasks() {
        let shutdown = ShutdownController::new();
        let guard = shutdown.register_task();
        let token = shutdown.token();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            token.cancelled().await;
        });

        shutdown.shutdown(Duration::from_secs(1)).await;
        assert_eq!(shutdown.active_task_count(), 0);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_at_the_deadline() {
        let shutdown = ShutdownController::new();
        let _stuck = shutdown.register_task();

        shutdown.shutdown(Duration::from_millis(200)).await;
        assert_eq!(shutdown.active_task_count(), 1);
    }
}
