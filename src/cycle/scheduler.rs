use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::DeviceBackend;
use crate::core::{Error, Result};

/// Configuration for the cycle scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity of the status event channel
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { event_capacity: 64 }
    }
}

/// Kind of state transition a [`CycleEvent`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// A cycle started from Idle and the device was turned on
    Started,
    /// A request arrived while running and was appended to the queue
    Queued,
    /// A timer expired with the queue nonempty; the next segment began
    /// without touching the device
    Resumed,
    /// One second of the current segment elapsed
    Tick,
    /// The queue drained and the device was turned off
    Finished,
    /// The cycle was cancelled and the device was turned off
    Stopped,
}

/// Status notification emitted on every scheduler state transition
#[derive(Debug, Clone)]
pub struct CycleEvent {
    /// Device key
    pub ip: Ipv4Addr,
    /// Device description, for status display
    pub description: String,
    /// What happened
    pub status: CycleStatus,
    /// Durations still queued behind the active segment
    pub remaining_queue: usize,
    /// Seconds left in the active segment (or requested, for `Queued`)
    pub countdown_secs: u64,
}

/// Outcome of a cycle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The device was turned on and a timer started
    Started { duration_secs: u64 },
    /// A cycle was already running; the duration was queued
    Queued { position: usize },
}

/// Outcome of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A running cycle was cancelled
    Stopped { discarded: usize },
    /// Nothing was running for this device
    NoActiveCycle,
}

/// Per-device-key scheduler state
///
/// Created lazily on the first request for a key and kept for the process
/// lifetime; quiescent when `running` is false and the queue is empty.
#[derive(Default)]
struct CycleState {
    running: bool,
    description: String,
    queue: VecDeque<u64>,
    cancel: Option<CancellationToken>,
    /// Bumped on every reservation so a stale failure path cannot clobber
    /// a newer cycle's state
    generation: u64,
}

struct SchedulerInner {
    backend: Arc<dyn DeviceBackend>,
    states: Mutex<HashMap<Ipv4Addr, CycleState>>,
    events: broadcast::Sender<CycleEvent>,
}

/// Runs devices on for a requested span, then off, one cycle at a time per
/// device key
///
/// A request against an idle key turns the device on and starts a timer; a
/// request against a running key is queued FIFO. At a segment seam the device
/// stays on, with no off/on toggle. At most one timer is active per key, and
/// `stop` invalidates it synchronously through its cancellation token.
#[derive(Clone)]
pub struct CycleScheduler {
    inner: Arc<SchedulerInner>,
}

impl CycleScheduler {
    /// Creates a scheduler issuing device I/O through `backend`
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self::with_config(backend, SchedulerConfig::default())
    }

    /// Creates a scheduler with explicit settings
    pub fn with_config(backend: Arc<dyn DeviceBackend>, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        CycleScheduler {
            inner: Arc::new(SchedulerInner {
                backend,
                states: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Subscribes to scheduler status events
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.inner.events.subscribe()
    }

    /// Requests a timed on-then-off cycle of `duration_secs`
    ///
    /// Idle key: turns the device on and starts the timer; a `turn_on`
    /// failure aborts the whole request and nothing is scheduled. Running
    /// key: appends to the queue with no device I/O.
    pub async fn request_cycle(
        &self,
        ip: Ipv4Addr,
        description: &str,
        duration_secs: u64,
    ) -> Result<CycleOutcome> {
        if duration_secs == 0 {
            return Err(Error::validation("cycle duration must be positive"));
        }

        // Reserve the key under the lock before any I/O so a concurrent
        // request cannot start a second timer. The token is installed here
        // too, so a stop() racing the turn_on below can still cancel us.
        let token = CancellationToken::new();
        let generation;
        {
            let mut states = self.inner.states.lock().expect("lock poisoned");
            let state = states.entry(ip).or_default();
            if state.running {
                state.queue.push_back(duration_secs);
                let position = state.queue.len();
                debug!(%ip, duration_secs, position, "cycle queued");
                self.inner.emit(CycleEvent {
                    ip,
                    description: state.description.clone(),
                    status: CycleStatus::Queued,
                    remaining_queue: position,
                    countdown_secs: duration_secs,
                });
                return Ok(CycleOutcome::Queued { position });
            }
            state.running = true;
            state.description = description.to_string();
            state.queue.clear();
            state.cancel = Some(token.clone());
            state.generation += 1;
            generation = state.generation;
        }

        if let Err(e) = self.inner.backend.turn_on(ip).await {
            // Nothing was scheduled; release the reservation, unless a stop
            // and a newer request already moved the key on. Requests queued
            // behind this reservation will never run, so flush them and let
            // subscribers know rather than leave them stranded.
            let flushed = {
                let mut states = self.inner.states.lock().expect("lock poisoned");
                match states.get_mut(&ip) {
                    Some(state) if state.generation == generation => {
                        state.running = false;
                        state.cancel = None;
                        let discarded = state.queue.len();
                        state.queue.clear();
                        (discarded > 0).then(|| (state.description.clone(), discarded))
                    }
                    _ => None,
                }
            };
            if let Some((description, discarded)) = flushed {
                warn!(%ip, discarded, "flushing cycles queued behind a failed start");
                self.inner.emit(CycleEvent {
                    ip,
                    description,
                    status: CycleStatus::Stopped,
                    remaining_queue: 0,
                    countdown_secs: 0,
                });
            }
            return Err(e);
        }

        // Re-validate after the await: a stop() may have cancelled the cycle
        // while the turn_on was in flight, after its own turn_off landed.
        if token.is_cancelled() {
            self.inner.turn_off_settled(ip, generation).await;
            return Ok(CycleOutcome::Started { duration_secs });
        }
        info!(%ip, duration_secs, "cycle started");
        self.inner.emit(CycleEvent {
            ip,
            description: description.to_string(),
            status: CycleStatus::Started,
            remaining_queue: 0,
            countdown_secs: duration_secs,
        });

        let inner = Arc::clone(&self.inner);
        let description = description.to_string();
        tokio::spawn(async move {
            inner.run_timer(ip, description, token, duration_secs).await;
        });

        Ok(CycleOutcome::Started { duration_secs })
    }

    /// Cancels any active cycle: pending timer invalidated, queue discarded,
    /// device turned off unconditionally
    ///
    /// Always leaves the key Idle; a `turn_off` failure is logged, not
    /// surfaced. Stopping an idle key is a no-op.
    pub async fn stop(&self, ip: Ipv4Addr) -> StopOutcome {
        let (description, discarded, generation) = {
            let mut states = self.inner.states.lock().expect("lock poisoned");
            let Some(state) = states.get_mut(&ip) else {
                return StopOutcome::NoActiveCycle;
            };
            if !state.running {
                return StopOutcome::NoActiveCycle;
            }
            // Cancel while holding the lock: a racing expiry re-checks the
            // token under this same lock and backs off.
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            let discarded = state.queue.len();
            state.queue.clear();
            state.running = false;
            (state.description.clone(), discarded, state.generation)
        };

        self.inner.turn_off_settled(ip, generation).await;
        info!(%ip, discarded, "cycle stopped");
        self.inner.emit(CycleEvent {
            ip,
            description,
            status: CycleStatus::Stopped,
            remaining_queue: 0,
            countdown_secs: 0,
        });
        StopOutcome::Stopped { discarded }
    }

    /// Whether a cycle is currently running for this key
    pub fn is_running(&self, ip: Ipv4Addr) -> bool {
        let states = self.inner.states.lock().expect("lock poisoned");
        states.get(&ip).is_some_and(|s| s.running)
    }

    /// Number of durations queued behind the active segment
    pub fn queue_length(&self, ip: Ipv4Addr) -> usize {
        let states = self.inner.states.lock().expect("lock poisoned");
        states.get(&ip).map_or(0, |s| s.queue.len())
    }
}

impl SchedulerInner {
    fn emit(&self, event: CycleEvent) {
        // No subscribers is fine; events are best-effort status display.
        let _ = self.events.send(event);
    }

    /// Turns the device off for a cycle that ended, then re-validates: a new
    /// request can reserve the key while the off is in flight, and the stale
    /// off may land after its turn_on. When a newer generation is running,
    /// the turn_on is re-issued so the off cannot strand that cycle.
    async fn turn_off_settled(&self, ip: Ipv4Addr, generation: u64) {
        if let Err(e) = self.backend.turn_off(ip).await {
            // Device state may be stale until the next refresh.
            warn!(%ip, "turn off failed: {}", e);
        }
        let superseded = {
            let states = self.states.lock().expect("lock poisoned");
            states
                .get(&ip)
                .is_some_and(|s| s.running && s.generation != generation)
        };
        if superseded {
            debug!(%ip, "re-issuing turn on for the cycle that took over the key");
            if let Err(e) = self.backend.turn_on(ip).await {
                warn!(%ip, "turn on for superseding cycle failed: {}", e);
            }
        }
    }

    /// Timer task for one running span: counts the active segment down,
    /// chains queued segments, and turns the device off when the queue drains
    async fn run_timer(
        self: Arc<Self>,
        ip: Ipv4Addr,
        description: String,
        token: CancellationToken,
        first_duration: u64,
    ) {
        let mut duration = first_duration;
        loop {
            let mut remaining = duration;
            while remaining > 0 {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep(Duration::from_secs(1)) => {}
                }
                remaining -= 1;
                if remaining > 0 {
                    let queued = {
                        let states = self.states.lock().expect("lock poisoned");
                        states.get(&ip).map_or(0, |s| s.queue.len())
                    };
                    self.emit(CycleEvent {
                        ip,
                        description: description.clone(),
                        status: CycleStatus::Tick,
                        remaining_queue: queued,
                        countdown_secs: remaining,
                    });
                }
            }

            // Segment expiry: chain the next queued duration or go Idle.
            // The generation at the Idle transition lets the off below tell
            // whether a newer cycle took the key while it was in flight.
            let (next, generation) = {
                let mut states = self.states.lock().expect("lock poisoned");
                if token.is_cancelled() {
                    // stop() won the race after our final sleep
                    return;
                }
                let Some(state) = states.get_mut(&ip) else { return };
                match state.queue.pop_front() {
                    Some(next) => (Some((next, state.queue.len())), state.generation),
                    None => {
                        state.running = false;
                        state.cancel = None;
                        (None, state.generation)
                    }
                }
            };

            match next {
                Some((next_duration, queued)) => {
                    // Device is already on; no off/on toggle at the seam.
                    debug!(%ip, next_duration, "cycle segment chained");
                    self.emit(CycleEvent {
                        ip,
                        description: description.clone(),
                        status: CycleStatus::Resumed,
                        remaining_queue: queued,
                        countdown_secs: next_duration,
                    });
                    duration = next_duration;
                }
                None => {
                    self.turn_off_settled(ip, generation).await;
                    info!(%ip, "cycle finished");
                    self.emit(CycleEvent {
                        ip,
                        description,
                        status: CycleStatus::Finished,
                        remaining_queue: 0,
                        countdown_secs: 0,
                    });
                    return;
                }
            }
        }
    }
}
