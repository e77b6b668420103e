//! Coalesces independent per-key requests into batched fetches.
//!
//! Callers hand a key to [`RequestCoalescer::load`] and get back a future for
//! that key's value. Keys queued within `batch_delay` of each other share one
//! call to [`BatchFetch::fetch_batch`]; a queue that reaches `batch_size`
//! starts a fetch right away. Batches of one coalescer never overlap: keys
//! queued while a batch is in flight wait for the next one, which starts a
//! `cooldown` after the previous batch settles. Loads arriving during that
//! cooldown ride along with it and never push it back.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Image360Error;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(50);

/// The fetch a coalescer drives once per batch.
pub trait BatchFetch: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Value: Clone + Send + 'static;

    /// Fetches values for distinct `keys`. Keys missing from the returned map
    /// resolve to [`BatchFetch::default_value`].
    fn fetch_batch(
        &self,
        keys: Vec<Self::Key>,
    ) -> impl Future<Output = Result<HashMap<Self::Key, Self::Value>, Image360Error>> + Send;

    fn default_value(&self, key: &Self::Key) -> Self::Value;
}

pub trait ScheduledHandle: Send + 'static {
    fn cancel(&self);
}

/// Runs a callback once after a delay.
///
/// `schedule` must not run the callback before returning.
pub trait Scheduler: Send + Sync + 'static {
    type Handle: ScheduledHandle;

    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> Self::Handle;
}

/// Schedules callbacks on the tokio timer. Must be used from within a tokio
/// runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[derive(Debug)]
pub struct TokioTimer(JoinHandle<()>);

impl ScheduledHandle for TokioTimer {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Scheduler for TokioScheduler {
    type Handle = TokioTimer;

    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TokioTimer {
        TokioTimer(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub cooldown: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

type Settle<V> = oneshot::Sender<Result<V, Image360Error>>;

struct PendingRequest<K, V> {
    key: K,
    enqueued_at: Instant,
    settle: Settle<V>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Delay,
    Cooldown,
}

struct TimerSlot<H> {
    handle: Option<H>,
    due: Option<Instant>,
    /// Bumped whenever the slot changes; a callback from an older timer is
    /// ignored.
    epoch: u64,
}

impl<H: ScheduledHandle> TimerSlot<H> {
    fn new() -> Self {
        Self {
            handle: None,
            due: None,
            epoch: 0,
        }
    }

    fn cancel(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.due = None;
        if let Some(timer) = self.handle.take() {
            timer.cancel();
        }
    }
}

struct CoalescerState<K, V, H> {
    queue: Vec<PendingRequest<K, V>>,
    delay: TimerSlot<H>,
    cooldown: TimerSlot<H>,
    processing: bool,
}

impl<K, V, H: ScheduledHandle> CoalescerState<K, V, H> {
    fn slot_mut(&mut self, kind: TimerKind) -> &mut TimerSlot<H> {
        match kind {
            TimerKind::Delay => &mut self.delay,
            TimerKind::Cooldown => &mut self.cooldown,
        }
    }

    fn cancel_timers(&mut self) {
        self.delay.cancel();
        self.cooldown.cancel();
    }
}

struct Inner<F: BatchFetch, S: Scheduler> {
    fetcher: F,
    scheduler: S,
    config: CoalescerConfig,
    state: Mutex<CoalescerState<F::Key, F::Value, S::Handle>>,
}

type State<F, S> =
    CoalescerState<<F as BatchFetch>::Key, <F as BatchFetch>::Value, <S as Scheduler>::Handle>;

/// Cloneable handle; clones share one queue.
pub struct RequestCoalescer<F: BatchFetch, S: Scheduler = TokioScheduler> {
    inner: Arc<Inner<F, S>>,
}

impl<F: BatchFetch, S: Scheduler> Clone for RequestCoalescer<F, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: BatchFetch> RequestCoalescer<F> {
    pub fn new(fetcher: F, config: CoalescerConfig) -> Self {
        Self::with_scheduler(fetcher, TokioScheduler, config)
    }
}

impl<F: BatchFetch, S: Scheduler> RequestCoalescer<F, S> {
    pub fn with_scheduler(fetcher: F, scheduler: S, config: CoalescerConfig) -> Self {
        let config = CoalescerConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                fetcher,
                scheduler,
                config,
                state: Mutex::new(CoalescerState {
                    queue: Vec::new(),
                    delay: TimerSlot::new(),
                    cooldown: TimerSlot::new(),
                    processing: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> CoalescerConfig {
        self.inner.config
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    /// Requests waiting for a batch, not counting the one in flight.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().processing
    }

    /// Queues `key` immediately and returns a future for its value.
    ///
    /// Dropping the future does not remove the key from its batch.
    pub fn load(
        &self,
        key: F::Key,
    ) -> impl Future<Output = Result<F::Value, Image360Error>> + Send + 'static + use<F, S> {
        let receiver = self.enqueue(key);
        async move { receiver.await.unwrap_or(Err(Image360Error::BatchAborted)) }
    }

    fn enqueue(&self, key: F::Key) -> oneshot::Receiver<Result<F::Value, Image360Error>> {
        let (settle, receiver) = oneshot::channel();
        let inner = &self.inner;
        let mut state = inner.state.lock();
        state.queue.push(PendingRequest {
            key,
            enqueued_at: Instant::now(),
            settle,
        });
        if state.queue.len() >= inner.config.batch_size {
            inner.try_start(&mut state);
        } else {
            inner.arm_delay(&mut state);
        }
        receiver
    }
}

impl<F: BatchFetch, S: Scheduler> Inner<F, S> {
    /// Restarts the batch delay, unless a pending cooldown attempt would
    /// fire no later.
    fn arm_delay(self: &Arc<Self>, state: &mut State<F, S>) {
        let due = Instant::now() + self.config.batch_delay;
        if state.cooldown.due.is_some_and(|cooldown| cooldown <= due) {
            state.delay.cancel();
            return;
        }
        self.arm(state, TimerKind::Delay, self.config.batch_delay);
    }

    fn arm(self: &Arc<Self>, state: &mut State<F, S>, kind: TimerKind, delay: Duration) {
        let slot = state.slot_mut(kind);
        slot.cancel();
        let epoch = slot.epoch;
        let inner = Arc::clone(self);
        let handle = self.scheduler.schedule(
            delay,
            Box::new(move || {
                let mut state = inner.state.lock();
                let slot = state.slot_mut(kind);
                if slot.epoch != epoch {
                    return;
                }
                slot.handle = None;
                slot.due = None;
                inner.try_start(&mut state);
            }),
        );
        let slot = state.slot_mut(kind);
        slot.handle = Some(handle);
        slot.due = Some(Instant::now() + delay);
    }

    /// No-op while a batch is in flight; the running batch re-arms on exit.
    fn try_start(self: &Arc<Self>, state: &mut State<F, S>) {
        if state.processing || state.queue.is_empty() {
            return;
        }
        state.cancel_timers();
        state.processing = true;
        let take = state.queue.len().min(self.config.batch_size);
        let batch: Vec<_> = state.queue.drain(..take).collect();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = ProcessingGuard(Arc::clone(&inner));
            inner.run_batch(batch).await;
        });
    }

    async fn run_batch(&self, batch: Vec<PendingRequest<F::Key, F::Value>>) {
        let keys = unique_keys(&batch);
        let waited = batch
            .first()
            .map(|request| request.enqueued_at.elapsed())
            .unwrap_or_default();
        debug!(
            requests = batch.len(),
            keys = keys.len(),
            waited_ms = waited.as_millis() as u64,
            "starting batch"
        );

        let started = Instant::now();
        match self.fetcher.fetch_batch(keys.clone()).await {
            Ok(results) => {
                for key in keys.iter().filter(|key| !results.contains_key(*key)) {
                    warn!(?key, "no result in batch, using default");
                }
                let requests = batch.len();
                for request in batch {
                    let value = match results.get(&request.key) {
                        Some(value) => value.clone(),
                        None => self.fetcher.default_value(&request.key),
                    };
                    // The caller may have stopped waiting.
                    let _ = request.settle.send(Ok(value));
                }
                info!(
                    requests,
                    keys = keys.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch settled"
                );
            }
            Err(err) => {
                warn!(error = %err, requests = batch.len(), "batch failed");
                for request in batch {
                    let _ = request.settle.send(Err(err.clone()));
                }
            }
        }
    }

    fn finish_batch(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.processing = false;
        if !state.queue.is_empty() {
            state.delay.cancel();
            self.arm(&mut state, TimerKind::Cooldown, self.config.cooldown);
        }
    }
}

/// Distinct keys in first-seen order.
fn unique_keys<K: Clone + Eq + Hash, V>(batch: &[PendingRequest<K, V>]) -> Vec<K> {
    let mut seen = HashSet::with_capacity(batch.len());
    batch
        .iter()
        .filter(|request| seen.insert(&request.key))
        .map(|request| request.key.clone())
        .collect()
}

/// Clears the processing flag when a batch task ends, including by panic.
struct ProcessingGuard<F: BatchFetch, S: Scheduler>(Arc<Inner<F, S>>);

impl<F: BatchFetch, S: Scheduler> Drop for ProcessingGuard<F, S> {
    fn drop(&mut self) {
        self.0.finish_batch();
    }
}
