//! PlaybackScheduler: the single owner of the queue, the dedup ledger and the
//! playback state.
//!
//! The scheduler is synchronous and performs no I/O.  It hands back
//! [`InFlight`] values whenever the caller must start playing something, and
//! expects every playback attempt to be reported back through [`settle`]
//! with the generation it was started under.  Signals carrying an older
//! generation (after a reset, or a timeout that already advanced the queue)
//! are ignored.
//!
//! ```text
//!   poll(items) ──► diff ──► enqueue(item) ──► try_advance()
//!                                                 │
//!                              Idle ◄── settle ◄── Playing(item, gen)
//! ```
//!
//! [`settle`]: PlaybackScheduler::settle
use tracing::{debug, info, warn};

use crate::ledger::DedupLedger;
use crate::protocol::{Item, SystemStatus};
use crate::queue::{PlaybackQueue, RejectReason};
use crate::snapshot::SnapshotTracker;

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Record the first poll as a baseline instead of enqueueing it.
    pub skip_initial_snapshot: bool,
    /// Start with the playback gate open.
    pub authorized: bool,
}

/// One playback attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub item: Item,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing(InFlight),
}

/// How a playback attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Ended,
    Failed(String),
    TimedOut,
}

/// Result of [`PlaybackScheduler::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Accepted; the driver is busy or gated.  Carries the queue length.
    Queued(usize),
    /// Accepted and the driver was idle, so playback of the queue head began.
    Started(InFlight),
    Rejected(RejectReason),
}

/// Result of [`PlaybackScheduler::settle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// The signal belongs to an attempt that is no longer current.
    Stale,
    /// Back to idle; nothing left to play (or the gate is closed).
    Idle,
    /// Back to idle, then the next item was started.
    Next(InFlight),
}

#[derive(Debug)]
pub struct PlaybackScheduler {
    queue: PlaybackQueue,
    ledger: DedupLedger,
    state: PlaybackState,
    snapshots: SnapshotTracker,
    authorized: bool,
    generation: u64,
}

impl PlaybackScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            queue: PlaybackQueue::new(),
            ledger: DedupLedger::new(),
            state: PlaybackState::Idle,
            snapshots: SnapshotTracker::new(options.skip_initial_snapshot),
            authorized: options.authorized,
            generation: 0,
        }
    }

    // ── poller side ───────────────────────────────────────────────────────────

    /// Record a fresh snapshot and return the items that were not in the
    /// previous one, oldest first.  Nothing is enqueued here; the caller
    /// dispatches the result (staggered) through [`enqueue`].
    ///
    /// [`enqueue`]: PlaybackScheduler::enqueue
    pub fn poll(&mut self, items: &[Item]) -> Vec<Item> {
        let had_baseline = self.snapshots.has_baseline();
        let fresh = self.snapshots.observe(items);
        if !had_baseline {
            info!("scheduler: baseline of {} file(s) recorded", items.len());
        } else if !fresh.is_empty() {
            info!("scheduler: {} new file(s) detected", fresh.len());
        }
        fresh
    }

    // ── queue manager ─────────────────────────────────────────────────────────

    pub fn enqueue(&mut self, item: Item) -> Enqueued {
        let name = item.name.clone();
        match self.queue.admit(item, &self.ledger) {
            Err(reason) => {
                debug!("scheduler: rejected {:?} ({:?})", name, reason);
                Enqueued::Rejected(reason)
            }
            Ok(len) => {
                self.log_queue();
                match self.try_advance() {
                    Some(started) => Enqueued::Started(started),
                    None => Enqueued::Queued(len),
                }
            }
        }
    }

    /// Structural pop of the queue head.  Does not start playback.
    pub fn dequeue(&mut self) -> Option<Item> {
        self.queue.dequeue()
    }

    /// Drop the queue and the ledger and force `Idle`.  Returns the attempt
    /// that was abandoned, if any; its late signals will be stale.
    pub fn reset(&mut self) -> Option<InFlight> {
        self.queue.clear();
        self.ledger.clear();
        let abandoned = match std::mem::take(&mut self.state) {
            PlaybackState::Playing(in_flight) => Some(in_flight),
            PlaybackState::Idle => None,
        };
        // Burn a generation so nothing issued before the reset can match.
        self.generation += 1;
        info!("scheduler: queue system reset");
        abandoned
    }

    /// Forget which files were played.  Queue and playback are untouched.
    pub fn clear_played(&mut self) {
        self.ledger.clear();
        info!("scheduler: played-file ledger cleared");
    }

    // ── playback driver ───────────────────────────────────────────────────────

    /// Start the queue head if the gate is open and nothing is playing.
    pub fn try_advance(&mut self) -> Option<InFlight> {
        if !self.authorized {
            debug!("scheduler: not authorised, holding {} file(s)", self.queue.len());
            return None;
        }
        if matches!(self.state, PlaybackState::Playing(_)) {
            return None;
        }
        let item = self.queue.dequeue()?;

        // Claim before playback so a later poll cannot re-admit it in flight.
        self.ledger.mark(&item.name);
        self.generation += 1;
        let in_flight = InFlight {
            item,
            generation: self.generation,
        };
        info!(
            "scheduler: playing {} (gen={})",
            in_flight.item.name, in_flight.generation
        );
        self.state = PlaybackState::Playing(in_flight.clone());
        self.log_queue();
        Some(in_flight)
    }

    /// Report the end of the attempt started under `generation`.
    pub fn settle(&mut self, generation: u64, outcome: &PlaybackOutcome) -> Settled {
        let current = match &self.state {
            PlaybackState::Playing(in_flight) if in_flight.generation == generation => {
                in_flight.item.name.clone()
            }
            _ => {
                debug!(
                    "scheduler: ignoring stale {:?} for gen={} (current={:?})",
                    outcome,
                    generation,
                    self.current_generation()
                );
                return Settled::Stale;
            }
        };

        match outcome {
            PlaybackOutcome::Ended => info!("scheduler: finished {}", current),
            PlaybackOutcome::Failed(reason) => {
                warn!("scheduler: playback of {} failed: {}", current, reason)
            }
            PlaybackOutcome::TimedOut => warn!("scheduler: timeout for {}", current),
        }
        self.state = PlaybackState::Idle;
        self.log_queue();

        match self.try_advance() {
            Some(next) => Settled::Next(next),
            None => Settled::Idle,
        }
    }

    // ── authorization gate ────────────────────────────────────────────────────

    /// Open the gate and start draining the queue.
    pub fn authorize(&mut self) -> Option<InFlight> {
        if !self.authorized {
            info!("scheduler: playback authorised");
            self.authorized = true;
        }
        self.try_advance()
    }

    /// Close the gate.  An attempt already in flight runs to completion but
    /// nothing new is started.
    pub fn revoke(&mut self) {
        if self.authorized {
            info!("scheduler: playback authorisation withdrawn");
            self.authorized = false;
        }
    }

    // ── introspection ─────────────────────────────────────────────────────────

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn current(&self) -> Option<&InFlight> {
        match &self.state {
            PlaybackState::Playing(in_flight) => Some(in_flight),
            PlaybackState::Idle => None,
        }
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.current().map(|in_flight| in_flight.generation)
    }

    pub fn is_playing(&self) -> bool {
        self.current().is_some()
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Status fields owned by the scheduler.  Poll counters and `rev` are
    /// left at their defaults for the caller to fill in.
    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            queue_length: self.queue.len(),
            queued: self.queue.names(),
            is_playing: self.is_playing(),
            current: self.current().map(|in_flight| in_flight.item.name.clone()),
            played_count: self.ledger.len(),
            authorized: self.authorized,
            ..SystemStatus::default()
        }
    }

    fn log_queue(&self) {
        info!(
            "queue: {} file(s) waiting, playing: {}",
            self.queue.len(),
            self.is_playing()
        );
        if !self.queue.is_empty() {
            debug!("queue: {:?}", self.queue.names());
        }
    }
}
