// libs/conversation-cell/src/services/reaper.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_utils::Clock;

use crate::services::session_store::SessionStore;

/// Background loop that drops expired sessions from stores without native
/// key expiry.
pub struct SessionReaper {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

/// Stops the reaper when signalled or dropped.
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Session reaper task ended abnormally: {}", e);
        }
    }
}

impl SessionReaper {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self { store, clock, interval }
    }

    pub fn spawn(self) -> ReaperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            info!("Session reaper started for {} store", self.store.backend_name());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Session reaper stopping");
                            break;
                        }
                    }
                }
            }
        });

        ReaperHandle { shutdown, handle }
    }

    pub async fn sweep(&self) -> usize {
        match self.store.purge_expired(self.clock.now()).await {
            Ok(purged) => {
                if purged > 0 {
                    info!("Session reaper purged {} expired sessions", purged);
                }
                purged
            }
            Err(e) => {
                warn!("Session reaper sweep failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use shared_utils::FixedClock;

    use crate::models::ConversationSession;
    use crate::services::session_store::InMemorySessionStore;

    #[tokio::test(start_paused = true)]
    async fn reaper_loop_purges_on_interval() {
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));

        let session = ConversationSession::new("old", clock.now());
        store.save(&session, ChronoDuration::minutes(30)).await.unwrap();
        clock.advance(ChronoDuration::hours(1));

        let handle = SessionReaper::new(store.clone(), clock.clone(), Duration::from_secs(60)).spawn();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.is_empty().await);
        handle.shutdown().await;
    }
}
