//! # fetchx-transport: Delay Wheel
//!
//! One shared one-second ticker drives every whole-second delay between one
//! second and ten minutes. Anything else gets its own one-shot timer.
//!
//! ## Mechanical Sympathy
//! - **One system timer**: a thousand pending retries cost one `Interval`,
//!   not a thousand sleeping tasks.
//! - **Lazy ticker**: the ticker is spawned by the first wheel-resident entry
//!   and exits on the first tick that finds the wheel empty.
//! - **Callbacks run unlocked**: an entry is detached under the lock and fired
//!   after it is released, so a callback may schedule or cancel freely.
//!
//! ## Phase
//! A slot `n` ticks ahead fires when the `n`th tick arrives, and the next tick
//! may be less than a second away. Entries scheduled between ticks are
//! therefore placed one slot further out, so a delay `d` fires within
//! `[d, d + 1 s)`. An entry that would need a 601st slot gets a fallback timer.

use fetchx_dsa::{SlotRing, WHEEL_SLOTS};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

pub const TICK: Duration = Duration::from_secs(1);

/// Longest delay that is still wheel-resident.
pub const MAX_WHEEL_DELAY_MS: u64 = WHEEL_SLOTS as u64 * 1000;

/// Error type async callbacks may report; it is logged and counted, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("DelayWheel must be created inside a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

enum TimeoutCallback {
    Sync(Box<dyn FnOnce() + Send>),
    Task(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CallbackError>> + Send>),
}

struct TimeoutEntry {
    key: String,
    callback: TimeoutCallback,
}

enum Placement {
    Slot { slot: usize, id: u64 },
    Fallback { id: u64, timer: JoinHandle<()> },
}

struct Ticker {
    generation: u64,
    task: JoinHandle<()>,
    /// Deadline of the tick that will advance the cursor next.
    next_tick: Instant,
}

struct WheelState {
    ring: SlotRing<TimeoutEntry>,
    index: HashMap<String, Placement>,
    ticker: Option<Ticker>,
    next_id: u64,
    next_ticker: u64,
}

impl WheelState {
    /// Removes whatever `placement` points at. The detached entry is returned
    /// so the caller can drop it after unlocking.
    fn detach(&mut self, placement: Placement) -> Option<TimeoutEntry> {
        match placement {
            Placement::Slot { slot, id } => self.ring.remove(slot, id),
            Placement::Fallback { timer, .. } => {
                timer.abort();
                None
            }
        }
    }

    fn owns_ticker(&self, generation: u64) -> bool {
        matches!(&self.ticker, Some(ticker) if ticker.generation == generation)
    }

    /// Slots ahead of the cursor for a delay of `seconds` starting `now`.
    fn offset_for(&self, seconds: usize, now: Instant) -> usize {
        match &self.ticker {
            Some(ticker) if ticker.next_tick.saturating_duration_since(now) < TICK => seconds + 1,
            _ => seconds,
        }
    }
}

struct WheelShared {
    state: Mutex<WheelState>,
    failures: AtomicUsize,
    runtime: Handle,
}

/// Keyed scheduler for retry and polling timers.
///
/// Scheduling under a key that is already pending replaces the old entry.
/// Clones share the same wheel.
#[derive(Clone)]
pub struct DelayWheel {
    shared: Arc<WheelShared>,
}

impl DelayWheel {
    /// Creates a wheel whose ticker and timers run on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            shared: Arc::new(WheelShared {
                state: Mutex::new(WheelState {
                    ring: SlotRing::new(WHEEL_SLOTS),
                    index: HashMap::new(),
                    ticker: None,
                    next_id: 1,
                    next_ticker: 1,
                }),
                failures: AtomicUsize::new(0),
                runtime,
            }),
        }
    }

    /// Creates a wheel on the runtime the caller is running in.
    pub fn current() -> Result<Self, TimerError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Whether `delay_ms` is eligible for a slot rather than a one-shot timer.
    pub fn is_wheel_resident(delay_ms: u64) -> bool {
        (1000..=MAX_WHEEL_DELAY_MS).contains(&delay_ms) && delay_ms % 1000 == 0
    }

    /// Runs `callback` once `delay_ms` has elapsed, replacing any entry
    /// pending under `key`. A panicking callback is caught and counted.
    pub fn schedule<F>(&self, key: impl Into<String>, delay_ms: u64, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_entry(key.into(), delay_ms, TimeoutCallback::Sync(Box::new(callback)));
    }

    /// Like `schedule`, but the callback produces a future that is spawned
    /// when the entry fires. An `Err` or a panic inside it is caught and counted.
    pub fn schedule_task<F, Fut, E>(&self, key: impl Into<String>, delay_ms: u64, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<CallbackError> + 'static,
    {
        let task = move || -> BoxFuture<'static, Result<(), CallbackError>> {
            let fut = callback();
            async move { fut.await.map_err(Into::into) }.boxed()
        };
        self.schedule_entry(key.into(), delay_ms, TimeoutCallback::Task(Box::new(task)));
    }

    fn schedule_entry(&self, key: String, delay_ms: u64, callback: TimeoutCallback) {
        let shared = &self.shared;
        let entry = TimeoutEntry {
            key: key.clone(),
            callback,
        };

        let mut state = shared.state.lock();
        let displaced = match state.index.remove(&key) {
            Some(previous) => state.detach(previous),
            None => None,
        };

        // Ids are issued under the lock so every slot stays sorted by id.
        let id = state.next_id;
        state.next_id += 1;

        let now = Instant::now();
        let offset = state.offset_for((delay_ms / 1000) as usize, now);

        if Self::is_wheel_resident(delay_ms) && offset <= WHEEL_SLOTS {
            let slot = state.ring.insert(offset, id, entry);
            state.index.insert(key, Placement::Slot { slot, id });

            if state.ticker.is_none() {
                let generation = state.next_ticker;
                state.next_ticker += 1;
                let next_tick = now + TICK;
                let task = shared
                    .runtime
                    .spawn(run_ticker(Arc::clone(shared), generation, next_tick));
                state.ticker = Some(Ticker {
                    generation,
                    task,
                    next_tick,
                });
                tracing::debug!("DelayWheel: ticker {} started", generation);
            }
        } else {
            let timer = shared.runtime.spawn(run_fallback(
                Arc::clone(shared),
                id,
                Duration::from_millis(delay_ms),
                entry,
            ));
            state.index.insert(key, Placement::Fallback { id, timer });
        }
        drop(state);
        drop(displaced);
    }

    /// Removes the entry pending under `key`. Unknown keys are a no-op.
    pub fn cancel(&self, key: &str) -> bool {
        let displaced = {
            let mut state = self.shared.state.lock();
            let Some(placement) = state.index.remove(key) else {
                return false;
            };
            state.detach(placement)
        };
        drop(displaced);
        true
    }

    /// Drops every pending entry, stops the ticker and rewinds the cursor to 0.
    pub fn clear_all(&self) {
        let (ring, dropped) = {
            let mut state = self.shared.state.lock();
            let dropped = state.index.len();
            for (_, placement) in state.index.drain() {
                if let Placement::Fallback { timer, .. } = placement {
                    timer.abort();
                }
            }
            if let Some(ticker) = state.ticker.take() {
                ticker.task.abort();
            }
            (std::mem::replace(&mut state.ring, SlotRing::new(WHEEL_SLOTS)), dropped)
        };
        drop(ring);
        if dropped > 0 {
            tracing::debug!("DelayWheel: cleared {} pending entries", dropped);
        }
    }

    /// Callbacks that panicked or returned an error so far.
    pub fn failure_count(&self) -> usize {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Pending entries, wheel-resident and fallback.
    pub fn len(&self) -> usize {
        self.shared.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shared.state.lock().index.contains_key(key)
    }

    /// Slot holding `key`, or `None` when it is absent or on a fallback timer.
    /// Between ticks a delay of `n` seconds lands `n + 1` slots ahead.
    pub fn slot_of(&self, key: &str) -> Option<usize> {
        match self.shared.state.lock().index.get(key) {
            Some(Placement::Slot { slot, .. }) => Some(*slot),
            _ => None,
        }
    }

    /// Current cursor position in `0..WHEEL_SLOTS`.
    pub fn position(&self) -> usize {
        self.shared.state.lock().ring.position()
    }

    pub fn is_ticking(&self) -> bool {
        self.shared.state.lock().ticker.is_some()
    }

    pub fn shutdown(&self) {
        tracing::info!("DelayWheel: shutting down with {} pending entries", self.len());
        self.clear_all();
    }
}

impl fmt::Debug for DelayWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DelayWheel")
            .field("position", &state.ring.position())
            .field("pending", &state.index.len())
            .field("ticking", &state.ticker.is_some())
            .field("failures", &self.shared.failures.load(Ordering::Relaxed))
            .finish()
    }
}

impl WheelShared {
    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn fire(self: &Arc<Self>, entry: TimeoutEntry) {
        let TimeoutEntry { key, callback } = entry;
        match callback {
            TimeoutCallback::Sync(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    self.record_failure();
                    tracing::warn!("DelayWheel: callback for {} panicked", key);
                }
            }
            TimeoutCallback::Task(callback) => {
                let task = match panic::catch_unwind(AssertUnwindSafe(callback)) {
                    Ok(task) => task,
                    Err(_) => {
                        self.record_failure();
                        tracing::warn!("DelayWheel: callback for {} panicked", key);
                        return;
                    }
                };
                let shared = Arc::clone(self);
                self.runtime.spawn(async move {
                    match AssertUnwindSafe(task).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            shared.record_failure();
                            tracing::warn!("DelayWheel: task for {} failed: {}", key, e);
                        }
                        Err(_) => {
                            shared.record_failure();
                            tracing::warn!("DelayWheel: task for {} panicked", key);
                        }
                    }
                });
            }
        }
    }
}

async fn run_fallback(shared: Arc<WheelShared>, id: u64, delay: Duration, entry: TimeoutEntry) {
    time::sleep(delay).await;

    let live = {
        let mut state = shared.state.lock();
        let current = matches!(
            state.index.get(&entry.key),
            Some(Placement::Fallback { id: live, .. }) if *live == id
        );
        if current {
            state.index.remove(&entry.key);
        }
        current
    };

    if live {
        shared.fire(entry);
    }
}

async fn run_ticker(shared: Arc<WheelShared>, generation: u64, start: Instant) {
    let mut interval = time::interval_at(start, TICK);
    loop {
        let deadline = interval.tick().await;

        let (slot, cutoff) = {
            let mut state = shared.state.lock();
            match state.ticker.as_mut() {
                Some(ticker) if ticker.generation == generation => {
                    ticker.next_tick = deadline + TICK;
                }
                _ => return,
            }
            // Entries scheduled from inside this tick get larger ids and wait
            // for the next revolution.
            (state.ring.advance(), state.next_id - 1)
        };

        // One entry per lock acquisition: a callback that cancels a sibling
        // in this slot removes it before we look again.
        loop {
            let entry = {
                let mut state = shared.state.lock();
                let Some(due) = state.ring.pop_due(slot, cutoff) else {
                    break;
                };
                let indexed = matches!(
                    state.index.get(&due.value.key),
                    Some(Placement::Slot { id, .. }) if *id == due.id
                );
                if indexed {
                    state.index.remove(&due.value.key);
                }
                due.value
            };
            shared.fire(entry);
        }

        let mut state = shared.state.lock();
        if !state.owns_ticker(generation) {
            return;
        }
        if state.index.is_empty() {
            state.ticker = None;
            tracing::debug!("DelayWheel: idle, ticker {} stopped", generation);
            return;
        }
    }
}

static_assertions::assert_impl_all!(DelayWheel: Send, Sync, Clone);
