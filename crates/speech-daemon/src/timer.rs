use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// One-shot timer that posts an event into a channel when it expires.
///
/// Arming replaces any pending expiry.  `cancel` may be called any number of
/// times, before or after the timer fired.
#[derive(Default)]
pub struct Timer {
    handle: Option<AbortHandle>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<E>(&mut self, after: Duration, tx: mpsc::Sender<E>, event: E)
    where
        E: Send + 'static,
    {
        self.cancel();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event).await;
        });
        self.handle = Some(task.abort_handle());
    }

    /// Returns true if a pending expiry was prevented.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(30), tx, 7u64);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(7));
        tokio::task::yield_now().await;
        assert!(!timer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry_and_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(30), tx, 1u64);

        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_expiry() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        timer.arm(Duration::from_secs(30), tx.clone(), 1u64);
        timer.arm(Duration::from_secs(30), tx, 2u64);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.recv().await, Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = Timer::new();
        timer.arm(Duration::from_millis(10), tx, 3u64);
        assert_eq!(rx.recv().await, Some(3));
        tokio::task::yield_now().await;
        assert!(!timer.cancel());
    }
}
