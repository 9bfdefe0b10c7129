//! Periodic removal of expired sessions
//!
//! Lookups already expire sessions lazily; the sweep bounds memory held by
//! sessions whose browsers never come back.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::registry::SessionRegistry;

/// Spawn a background task that sweeps expired sessions every `interval`.
///
/// Returns a `JoinHandle` for the spawned task; aborting it stops sweeping.
pub fn spawn_sweep_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick, nothing can have expired yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = registry.sweep().await;
            if removed > 0 {
                debug!(removed, "swept expired sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweep_task_evicts_idle_sessions() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        registry.create(1).await;
        registry.create(2).await;

        let handle = spawn_sweep_task(registry.clone(), Duration::from_secs(30));

        // Two ticks past the TTL; sleeping lets the paused clock auto-advance
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(registry.is_empty().await);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_keeps_fresh_sessions() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(3600)));
        registry.create(1).await;

        let handle = spawn_sweep_task(registry.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.len().await, 1);

        handle.abort();
    }
}
