//! TTL cleaner (§4.8): periodically deletes stopped sessions whose
//! `stopped_at` is older than the configured threshold. Spawned only
//! when `ttl_secs` is set; disabled by default.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::session::SessionManager;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs until `shutdown` is cancelled, sweeping expired sessions once per
/// `SWEEP_INTERVAL`.
pub async fn run_ttl_cleaner(manager: Arc<SessionManager>, ttl_secs: u64, shutdown: CancellationToken) {
    let ttl = Duration::from_secs(ttl_secs);
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(event = "daemon.ttl.cleaner_started", ttl_secs = ttl_secs);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                manager.sweep_expired(ttl);
            }
        }
    }

    info!(event = "daemon.ttl.cleaner_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::OutputStore;
    use crate::types::DaemonConfig;
    use shelli_protocol::SessionState;

    #[tokio::test]
    async fn test_ttl_cleaner_sweeps_then_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new(1024));
        let manager = SessionManager::new(DaemonConfig::default(), store.clone());
        store
            .create(
                "expired",
                crate::store::SessionMeta {
                    state: SessionState::Stopped,
                    stopped_at: Some("2000-01-01T00:00:00Z".to_string()),
                    ..crate::store::SessionMeta::new("expired", "bash", 80, 24, false, false)
                },
            )
            .unwrap();

        let shutdown = CancellationToken::new();
        manager.sweep_expired(Duration::from_secs(1));
        assert!(!store.exists("expired"));

        shutdown.cancel();
        run_ttl_cleaner(manager, 1, shutdown).await;
    }
}
