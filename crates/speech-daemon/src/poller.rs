use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::FileSource;
use crate::core::DaemonEvent;

/// Periodically list the remote files and hand the result to the core.
///
/// The first poll runs immediately.  A message on `refresh_rx` triggers an
/// extra poll right away and restarts the period.  Failures are reported as
/// `PollFailed` and the loop keeps going; it ends when the core goes away.
pub fn spawn<S: FileSource>(
    source: Arc<S>,
    interval: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut refresh_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                msg = refresh_rx.recv(), if refresh_open => {
                    match msg {
                        Some(()) => {
                            debug!("poller: refresh requested");
                            ticker.reset();
                        }
                        None => {
                            refresh_open = false;
                            continue;
                        }
                    }
                }
            }

            let event = match source.list_files().await {
                Ok(items) => DaemonEvent::PollCompleted(items),
                Err(e) => {
                    warn!("poller: listing failed: {}", e);
                    DaemonEvent::PollFailed(e.to_string())
                }
            };
            if event_tx.send(event).await.is_err() {
                debug!("poller: core gone, stopping");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, Result};
    use chrono::{TimeZone, Utc};
    use speech_proto::protocol::Item;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Alternates between a one-file listing and a failure.
    struct FlakySource {
        calls: AtomicUsize,
    }

    impl FileSource for FlakySource {
        fn list_files(&self) -> impl Future<Output = Result<Vec<Item>>> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call % 2 == 0 {
                    Ok(vec![Item::new(
                        format!("f{}.mp3", call),
                        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                    )])
                } else {
                    Err(ApiError::Rejected)
                }
            }
        }
    }

    fn source() -> Arc<FlakySource> {
        Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_on_interval() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (_refresh_tx, refresh_rx) = mpsc::channel(1);
        let src = source();
        let _task = spawn(src.clone(), Duration::from_secs(10), event_tx, refresh_rx);

        match event_rx.recv().await {
            Some(DaemonEvent::PollCompleted(items)) => assert_eq!(items[0].name, "f0.mp3"),
            other => panic!("unexpected {:?}", other),
        }

        let before = tokio::time::Instant::now();
        match event_rx.recv().await {
            Some(DaemonEvent::PollFailed(reason)) => assert!(reason.contains("failure")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(before.elapsed() >= Duration::from_secs(9));

        // Failure does not stop the loop.
        assert!(matches!(
            event_rx.recv().await,
            Some(DaemonEvent::PollCompleted(_))
        ));
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_polls_right_away() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let _task = spawn(source(), Duration::from_secs(10), event_tx, refresh_rx);

        assert!(event_rx.recv().await.is_some());
        tokio::time::sleep(Duration::from_secs(2)).await;

        let before = tokio::time::Instant::now();
        refresh_tx.send(()).await.unwrap();
        assert!(event_rx.recv().await.is_some());
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_core_is_gone() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (_refresh_tx, refresh_rx) = mpsc::channel(1);
        let task = spawn(source(), Duration::from_secs(10), event_tx, refresh_rx);
        drop(event_rx);
        task.await.unwrap();
    }
}
