//! DaemonCore: single-owner event loop for all mutable state.
//!
//! The poller, the HTTP API, the playback timer, prefetch tasks and the mpv
//! reader all talk to this loop through `DaemonEvent` messages.  DaemonCore
//! owns the `PlaybackScheduler` and the `MpvDriver` exclusively; no other task
//! touches them.  After every transition the scheduler's view is published to
//! the shared `StateManager`.
//!
//! Every playback attempt carries the generation the scheduler issued for it.
//! Timer expiries, prefetch results and mpv `end-file` events are reported
//! with that generation, so a signal that outlived its attempt (after a
//! refresh, or a timeout that already moved on) is ignored.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use speech_proto::config::Config;
use speech_proto::platform;
use speech_proto::protocol::{Command, Item, PlayerHealth};
use speech_proto::scheduler::{
    Enqueued, InFlight, PlaybackOutcome, PlaybackScheduler, SchedulerOptions, Settled,
};
use speech_proto::state::StateManager;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::mpv::{EndFile, MpvDriver, MpvEvent, MpvHandle};
use crate::timer::Timer;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from the HTTP API.
    ClientCommand(Command),
    /// The poller fetched a listing.
    PollCompleted(Vec<Item>),
    /// The poller could not fetch a listing.
    PollFailed(String),
    /// One newly detected file, delivered by the staggered dispatcher.
    Enqueue(Item),
    /// The playback timer of an attempt expired.
    PlaybackTimeout { generation: u64 },
    /// A prefetch task finished.  `Ok` carries the staged local file.
    Prefetched {
        generation: u64,
        result: Result<PathBuf, String>,
    },
    /// Raw mpv unsolicited event (forwarded from reader task).
    MpvEvent(MpvEvent),
    /// Heartbeat: check process liveness.
    HeartbeatTick,
    /// Periodic activity summary.
    SummaryTick,
    Shutdown,
}

pub struct DaemonCore {
    config: Config,
    api: Arc<ApiClient>,
    scheduler: PlaybackScheduler,
    state_manager: Arc<StateManager>,
    mpv_driver: MpvDriver,
    /// Live handle to the mpv IO tasks.  `None` when mpv is not yet connected.
    mpv_handle: Option<MpvHandle>,
    player_health: PlayerHealth,
    /// Feeds timers, dispatchers, prefetch tasks and the mpv forwarder back
    /// into our own loop.
    event_tx: mpsc::Sender<DaemonEvent>,
    /// Asks the poller for an immediate listing.
    refresh_tx: mpsc::Sender<()>,
    playback_timer: Timer,
    /// mpv playlist entry id → generation of the attempt it was loaded for.
    entries: HashMap<i64, u64>,
    /// Generation of the attempt currently handed to mpv.
    loaded: Option<u64>,
    /// Pending staggered enqueues.
    dispatches: Vec<AbortHandle>,
    prefetch_task: Option<AbortHandle>,
    /// Prefetched file of the current attempt, removed once it settles.
    staged_file: Option<PathBuf>,
    tickers: Vec<AbortHandle>,
}

impl DaemonCore {
    pub fn new(
        config: Config,
        api: Arc<ApiClient>,
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<DaemonEvent>,
        refresh_tx: mpsc::Sender<()>,
    ) -> Self {
        let scheduler = PlaybackScheduler::new(SchedulerOptions {
            skip_initial_snapshot: config.polling.skip_initial_snapshot,
            authorized: config.playback.authorize_on_start,
        });
        let mpv_driver = MpvDriver::new(config.playback.mpv_path.clone());

        Self {
            config,
            api,
            scheduler,
            state_manager,
            mpv_driver,
            mpv_handle: None,
            player_health: PlayerHealth::Absent,
            event_tx,
            refresh_tx,
            playback_timer: Timer::new(),
            entries: HashMap::new(),
            loaded: None,
            dispatches: Vec::new(),
            prefetch_task: None,
            staged_file: None,
            tickers: Vec::new(),
        }
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        self.tickers.push(spawn_ticker(
            self.event_tx.clone(),
            HEARTBEAT_INTERVAL,
            || DaemonEvent::HeartbeatTick,
        ));
        self.tickers.push(spawn_ticker(
            self.event_tx.clone(),
            self.config.polling.summary_interval(),
            || DaemonEvent::SummaryTick,
        ));
        self.publish().await;

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                break;
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Returns false when the loop should stop.
    async fn handle_event(&mut self, evt: DaemonEvent) -> bool {
        match evt {
            DaemonEvent::Shutdown => {
                info!("DaemonCore: shutdown requested");
                return false;
            }

            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }

            DaemonEvent::PollCompleted(items) => {
                self.state_manager.record_poll_ok(Utc::now()).await;
                let fresh = self.scheduler.poll(&items);
                if !fresh.is_empty() {
                    self.dispatch(fresh);
                }
            }

            DaemonEvent::PollFailed(reason) => {
                debug!("DaemonCore: poll failed: {}", reason);
                self.state_manager.record_poll_failed().await;
            }

            DaemonEvent::Enqueue(item) => match self.scheduler.enqueue(item) {
                Enqueued::Started(in_flight) => self.drive(Some(in_flight)).await,
                Enqueued::Queued(_) => self.publish().await,
                Enqueued::Rejected(_) => {}
            },

            DaemonEvent::PlaybackTimeout { generation } => {
                let next = self.settle(generation, PlaybackOutcome::TimedOut).await;
                self.drive(next).await;
            }

            DaemonEvent::Prefetched { generation, result } => {
                self.handle_prefetched(generation, result).await;
            }

            DaemonEvent::MpvEvent(evt) => self.handle_mpv_event(evt).await,

            DaemonEvent::HeartbeatTick => self.heartbeat().await,

            DaemonEvent::SummaryTick => {
                if self.scheduler.is_playing() || !self.scheduler.queue().is_empty() {
                    self.log_summary();
                }
            }
        }
        true
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh => self.refresh().await,
            Command::Authorize => {
                let next = self.scheduler.authorize();
                self.drive(next).await;
            }
            Command::Revoke => {
                self.scheduler.revoke();
                self.publish().await;
            }
            Command::ClearPlayed => {
                self.scheduler.clear_played();
                self.publish().await;
            }
        }
    }

    // ── queue feeding ─────────────────────────────────────────────────────────

    /// Feed newly detected files to the loop one by one, `stagger` apart.
    fn dispatch(&mut self, fresh: Vec<Item>) {
        self.dispatches.retain(|task| !task.is_finished());
        let stagger = self.config.polling.stagger();
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            for (idx, item) in fresh.into_iter().enumerate() {
                if idx > 0 {
                    tokio::time::sleep(stagger).await;
                }
                if tx.send(DaemonEvent::Enqueue(item)).await.is_err() {
                    break;
                }
            }
        });
        self.dispatches.push(task.abort_handle());
    }

    /// Drop everything queued, played or in flight, then poll right away.
    async fn refresh(&mut self) {
        for task in self.dispatches.drain(..) {
            task.abort();
        }
        let abandoned = self.scheduler.reset();
        self.release_attempt().await;
        if let Some(in_flight) = abandoned {
            info!("DaemonCore: abandoning {}", in_flight.item.name);
            self.stop_player().await;
        }
        self.publish().await;

        if self.refresh_tx.try_send(()).is_err() {
            debug!("DaemonCore: refresh poll already pending");
        }
    }

    // ── playback ──────────────────────────────────────────────────────────────

    /// Begin `next` and keep going while attempts fail to even start.
    async fn drive(&mut self, mut next: Option<InFlight>) {
        while let Some(in_flight) = next.take() {
            let generation = in_flight.generation;
            if let Err(reason) = self.begin(in_flight).await {
                next = self.settle(generation, PlaybackOutcome::Failed(reason)).await;
            }
        }
        self.publish().await;
    }

    async fn begin(&mut self, in_flight: InFlight) -> Result<(), String> {
        self.log_summary();
        if self.config.playback.prefetch {
            self.spawn_prefetch(&in_flight);
            return Ok(());
        }
        let url = self.api.file_url(&in_flight.item.name);
        self.load(in_flight.generation, &url).await
    }

    /// Hand `target` to mpv and arm the playback timer.
    async fn load(&mut self, generation: u64, target: &str) -> Result<(), String> {
        let handle = self
            .ensure_mpv_handle()
            .await
            .ok_or_else(|| "mpv unavailable".to_string())?;

        self.playback_timer.arm(
            self.config.playback.timeout(),
            self.event_tx.clone(),
            DaemonEvent::PlaybackTimeout { generation },
        );
        let entry = handle
            .load_file(target, self.config.playback.volume)
            .await
            .map_err(|e| format!("loadfile failed: {}", e))?;

        self.loaded = Some(generation);
        if let Some(id) = entry {
            self.entries.insert(id, generation);
        }
        debug!("DaemonCore: gen={} loaded as entry {:?}", generation, entry);
        Ok(())
    }

    fn spawn_prefetch(&mut self, in_flight: &InFlight) {
        let api = Arc::clone(&self.api);
        let name = in_flight.item.name.clone();
        let generation = in_flight.generation;
        let dest = platform::cache_dir().join(format!(
            "{}-{}",
            generation,
            platform::sanitize_file_name(&name)
        ));
        let policy = self.config.playback.retry_policy();
        let tx = self.event_tx.clone();

        let task = tokio::spawn(async move {
            let result = api
                .prefetch(&name, dest, &policy)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(DaemonEvent::Prefetched { generation, result }).await;
        });
        self.prefetch_task = Some(task.abort_handle());
    }

    async fn handle_prefetched(&mut self, generation: u64, result: Result<PathBuf, String>) {
        if self.scheduler.current_generation() != Some(generation) {
            debug!("DaemonCore: discarding prefetch for stale gen={}", generation);
            if let Ok(path) = result {
                let _ = tokio::fs::remove_file(&path).await;
            }
            return;
        }

        let outcome = match result {
            Ok(path) => {
                let target = path.to_string_lossy().into_owned();
                self.staged_file = Some(path);
                match self.load(generation, &target).await {
                    Ok(()) => {
                        self.publish().await;
                        return;
                    }
                    Err(reason) => PlaybackOutcome::Failed(reason),
                }
            }
            Err(reason) => PlaybackOutcome::Failed(format!("prefetch failed: {}", reason)),
        };
        let next = self.settle(generation, outcome).await;
        self.drive(next).await;
    }

    /// Report the outcome of the attempt started under `generation`.
    /// Returns the next attempt to begin, if the scheduler started one.
    async fn settle(&mut self, generation: u64, outcome: PlaybackOutcome) -> Option<InFlight> {
        let settled = self.scheduler.settle(generation, &outcome);
        if settled == Settled::Stale {
            return None;
        }
        self.release_attempt().await;
        if outcome != PlaybackOutcome::Ended {
            self.stop_player().await;
        }
        match settled {
            Settled::Next(next) => Some(next),
            _ => None,
        }
    }

    /// Forget every resource tied to the attempt that just ended.
    async fn release_attempt(&mut self) {
        self.playback_timer.cancel();
        if let Some(task) = self.prefetch_task.take() {
            task.abort();
        }
        self.entries.clear();
        self.loaded = None;
        if let Some(path) = self.staged_file.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("DaemonCore: could not remove {:?}: {}", path, e);
            }
        }
    }

    async fn stop_player(&mut self) {
        if let Some(handle) = &self.mpv_handle {
            if let Err(e) = handle.stop().await {
                debug!("DaemonCore: mpv stop failed: {}", e);
            }
        }
    }

    // ── mpv ───────────────────────────────────────────────────────────────────

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        let Some(end) = evt.as_end_file() else {
            debug!("mpv event: {:?}", evt.event_name());
            return;
        };
        match route_end_file(&end, &mut self.entries, self.loaded) {
            Some((generation, outcome)) => {
                let next = self.settle(generation, outcome).await;
                self.drive(next).await;
            }
            None => debug!("DaemonCore: ignoring end-file {:?}", end),
        }
    }

    /// Liveness check.  A dead or unresponsive mpv is dropped (respawned on
    /// next use) and the attempt it was playing fails.
    async fn heartbeat(&mut self) {
        let Some(handle) = self.mpv_handle.clone() else {
            return;
        };
        let reason = if self.mpv_driver.has_exited() {
            "mpv exited"
        } else if let Err(e) = handle.ping().await {
            warn!("DaemonCore: heartbeat: mpv ping failed: {}", e);
            self.mpv_driver.kill().await;
            "mpv unresponsive"
        } else {
            return;
        };
        warn!("DaemonCore: heartbeat: {}", reason);
        self.mpv_handle = None;
        self.set_player_health(PlayerHealth::Dead).await;

        if let Some(generation) = self.loaded {
            let next = self
                .settle(generation, PlaybackOutcome::Failed(reason.to_string()))
                .await;
            self.drive(next).await;
        }
    }

    async fn set_player_health(&mut self, health: PlayerHealth) {
        if self.player_health != health {
            info!(
                "DaemonCore: mpv health {:?} → {:?}",
                self.player_health, health
            );
            self.player_health = health.clone();
            self.state_manager.set_player_health(health).await;
        }
    }

    async fn ensure_mpv_handle(&mut self) -> Option<MpvHandle> {
        if self.mpv_handle.is_some() && self.mpv_driver.has_exited() {
            warn!("DaemonCore: mpv process died, dropping handle");
            self.mpv_handle = None;
            self.set_player_health(PlayerHealth::Dead).await;
        }

        if self.mpv_handle.is_none() {
            // One forwarder task per connection.
            let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
            let core_tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(evt) = mpv_rx.recv().await {
                    if core_tx.send(DaemonEvent::MpvEvent(evt)).await.is_err() {
                        break;
                    }
                }
            });

            self.set_player_health(PlayerHealth::Starting).await;
            match self.mpv_driver.spawn_and_connect(mpv_tx).await {
                Ok(handle) => {
                    self.set_player_health(PlayerHealth::Running).await;
                    self.mpv_handle = Some(handle);
                }
                Err(e) => {
                    warn!("DaemonCore: failed to start mpv: {}", e);
                    self.set_player_health(PlayerHealth::Dead).await;
                    return None;
                }
            }
        }

        self.mpv_handle.clone()
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn publish(&self) {
        self.state_manager.publish(self.scheduler.status()).await;
    }

    fn log_summary(&self) {
        let current = self
            .scheduler
            .current()
            .map(|in_flight| in_flight.item.name.as_str())
            .unwrap_or("-");
        info!(
            "summary: queued={} playing={} current={} played={} authorized={}",
            self.scheduler.queue().len(),
            self.scheduler.is_playing(),
            current,
            self.scheduler.ledger().len(),
            self.scheduler.is_authorized()
        );
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: cleanup, killing mpv");
        for task in self.tickers.drain(..).chain(self.dispatches.drain(..)) {
            task.abort();
        }
        self.release_attempt().await;
        if let Some(handle) = self.mpv_handle.take() {
            let _ = handle.stop().await;
        }
        self.mpv_driver.kill().await;
    }
}

fn spawn_ticker(
    tx: mpsc::Sender<DaemonEvent>,
    period: Duration,
    make: fn() -> DaemonEvent,
) -> AbortHandle {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    })
    .abort_handle()
}

/// Map an `end-file` event to the attempt it ends and how it ended.
///
/// With a playlist entry id the attempt is looked up (and forgotten); an
/// unknown id belongs to an attempt that already settled.  Without one, only
/// `eof`, `error` and `quit` are attributed to the loaded attempt, since a
/// `stop` is what replacing or stopping a file produces.  `redirect` is never
/// an end.
fn route_end_file(
    end: &EndFile,
    entries: &mut HashMap<i64, u64>,
    loaded: Option<u64>,
) -> Option<(u64, PlaybackOutcome)> {
    let outcome = match end.reason.as_str() {
        "eof" => PlaybackOutcome::Ended,
        "redirect" => return None,
        "error" => PlaybackOutcome::Failed(
            end.file_error
                .clone()
                .unwrap_or_else(|| "playback error".to_string()),
        ),
        other => PlaybackOutcome::Failed(format!("playback ended early ({})", other)),
    };
    let generation = match end.playlist_entry_id {
        Some(id) => entries.remove(&id)?,
        None if matches!(end.reason.as_str(), "eof" | "error" | "quit") => loaded?,
        None => return None,
    };
    Some((generation, outcome))
}
