use crate::protocol::{PlayerHealth, SystemStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly view of the daemon for the HTTP API.
///
/// The core loop is the only writer.  Every write bumps `rev`.
pub struct StateManager {
    state: Arc<RwLock<SystemStatus>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SystemStatus {
                rev: 1,
                ..SystemStatus::default()
            })),
        }
    }

    pub async fn get_status(&self) -> SystemStatus {
        self.state.read().await.clone()
    }

    /// Replace the scheduler-owned fields.  Poll counters are kept.
    pub async fn publish(&self, scheduler_view: SystemStatus) {
        let mut state = self.state.write().await;
        state.queue_length = scheduler_view.queue_length;
        state.queued = scheduler_view.queued;
        state.is_playing = scheduler_view.is_playing;
        state.current = scheduler_view.current;
        state.played_count = scheduler_view.played_count;
        state.authorized = scheduler_view.authorized;
        state.rev += 1;
    }

    pub async fn record_poll_ok(&self, at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.polls_ok += 1;
        state.last_poll_at = Some(at);
        state.rev += 1;
    }

    pub async fn record_poll_failed(&self) {
        let mut state = self.state.write().await;
        state.polls_failed += 1;
        state.rev += 1;
    }

    pub async fn set_player_health(&self, health: PlayerHealth) {
        let mut state = self.state.write().await;
        if state.player != health {
            state.player = health;
            state.rev += 1;
        }
    }
}
