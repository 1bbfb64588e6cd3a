//! Reactive Stream Layer (C6): the user-facing "watch" handle, its
//! emission/debounce policy, and the manager that fans out
//! `DatabaseChange` notifications into refreshes (spec.md §4.6).

use crate::errors::{AppError, AppResult};
use crate::reactive::dependency::{DatabaseChange, DependencyTracker, RegistrationSpec};
use crate::schema::Schema;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Emission sent on the stream's channel: either a fresh generator result
/// or an error signal. The stream stays alive after an error (spec.md
/// §4.6 error policy).
#[derive(Debug, Clone)]
pub enum StreamEvent<T> {
    Data(T),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ReactiveStreamOptions {
    pub buffer_changes: bool,
    pub debounce_time: Duration,
}

impl Default for ReactiveStreamOptions {
    fn default() -> Self {
        Self {
            buffer_changes: true,
            debounce_time: Duration::from_millis(100),
        }
    }
}

impl ReactiveStreamOptions {
    pub fn with_buffer_changes(mut self, on: bool) -> Self {
        self.buffer_changes = on;
        self
    }

    pub fn with_debounce_time(mut self, d: Duration) -> Self {
        self.debounce_time = d;
        self
    }
}

type Generator<T> = Arc<dyn Fn() -> AppResult<T> + Send + Sync>;

/// A single reactive query. Holds a generator, a broadcast channel for
/// subscribers, and the debounce state for coalescing rapid refreshes.
pub struct ReactiveStream<T: Clone + Send + Sync + 'static> {
    pub id: String,
    generator: Generator<T>,
    sender: broadcast::Sender<StreamEvent<T>>,
    options: ReactiveStreamOptions,
    closed: AtomicBool,
    subscriber_count: AtomicUsize,
    debounce_generation: Mutex<u64>,
}

impl<T: Clone + Send + Sync + 'static> ReactiveStream<T> {
    /// Creates the stream, runs the generator once, and emits the initial
    /// result immediately (spec.md §4.6).
    pub fn new(id: impl Into<String>, generator: Generator<T>, options: ReactiveStreamOptions) -> Arc<Self> {
        let (sender, _) = broadcast::channel(32);
        let stream = Arc::new(Self {
            id: id.into(),
            generator,
            sender,
            options,
            closed: AtomicBool::new(false),
            subscriber_count: AtomicUsize::new(0),
            debounce_generation: Mutex::new(0),
        });
        stream.emit_now();
        stream
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent<T>> {
        self.subscriber_count.fetch_add(1, AtomicOrdering::SeqCst);
        self.sender.subscribe()
    }

    /// Subscribers only decrement explicitly; callers that drop a receiver
    /// should call this so `has_subscribers` reflects reality.
    pub fn unsubscribe(&self) {
        self.subscriber_count.fetch_sub(1, AtomicOrdering::SeqCst);
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count.load(AtomicOrdering::SeqCst) > 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    fn emit_now(&self) {
        let event = match (self.generator)() {
            Ok(value) => StreamEvent::Data(value),
            Err(e) => StreamEvent::Error(e.to_string()),
        };
        let _ = self.sender.send(event);
    }

    /// Forces re-execution and emission, honoring the debounce window when
    /// `buffer_changes` is set: only the latest call within the window
    /// actually emits.
    pub async fn refresh(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        if !self.options.buffer_changes {
            self.emit_now();
            return;
        }

        let generation = {
            let mut gen_lock = self.debounce_generation.lock().await;
            *gen_lock += 1;
            *gen_lock
        };

        let this = Arc::clone(self);
        let debounce = self.options.debounce_time;
        tokio::time::sleep(debounce).await;

        let still_current = {
            let gen_lock = this.debounce_generation.lock().await;
            *gen_lock == generation
        };
        if still_current && !this.is_closed() {
            this.emit_now();
        }
    }

    /// Cancels pending timers (implicit: a stale debounce generation is a
    /// no-op), closes the channel, and marks the stream dead so the
    /// manager's next `cleanup_inactive` sweep unregisters it.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
    }
}

/// Type-erased liveness handle the manager holds, so streams of different
/// `T` can share one map. Refreshing itself goes through the `refreshers`
/// closures below, since `ReactiveStream::refresh` needs `&Arc<Self>` to
/// spawn its debounce task and a trait object can't recover that.
pub trait ManagedStream: Send + Sync {
    fn close(&self);
    fn has_subscribers(&self) -> bool;
    fn is_closed(&self) -> bool;
}

impl<T: Clone + Send + Sync + 'static> ManagedStream for ReactiveStream<T> {
    fn close(&self) {
        ReactiveStream::close(self)
    }

    fn has_subscribers(&self) -> bool {
        ReactiveStream::has_subscribers(self)
    }

    fn is_closed(&self) -> bool {
        ReactiveStream::is_closed(self)
    }
}

/// Owns every live stream and the shared dependency tracker (C5). Mutating
/// operations flow in through `notify_change`; the manager fans out to
/// every affected, still-subscribed, not-yet-closed stream and awaits
/// their refreshes before returning (back-pressure on writers).
pub struct ReactiveStreamManager {
    schema: Arc<Schema>,
    tracker: RwLock<DependencyTracker>,
    streams: RwLock<HashMap<String, Arc<dyn ManagedStream>>>,
    refreshers: RwLock<HashMap<String, Box<dyn Fn() -> JoinHandle<()> + Send + Sync>>>,
}

impl ReactiveStreamManager {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            tracker: RwLock::new(DependencyTracker::new()),
            streams: RwLock::new(HashMap::new()),
            refreshers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a stream's liveness handle and its dependency spec in one
    /// call, so the two can never fall out of sync.
    pub async fn register<T: Clone + Send + Sync + 'static>(
        &self,
        stream: Arc<ReactiveStream<T>>,
        spec: RegistrationSpec,
    ) {
        let id = stream.id.clone();
        {
            let mut tracker = self.tracker.write().await;
            tracker.register(id.clone(), spec, &self.schema);
        }
        {
            let mut streams = self.streams.write().await;
            streams.insert(id.clone(), stream.clone());
        }
        let refresher: Box<dyn Fn() -> JoinHandle<()> + Send + Sync> = Box::new(move || {
            let s = stream.clone();
            tokio::spawn(async move {
                s.refresh().await;
            })
        });
        self.refreshers.write().await.insert(id, refresher);
    }

    pub async fn unregister(&self, stream_id: &str) {
        self.tracker.write().await.unregister(stream_id);
        self.streams.write().await.remove(stream_id);
        self.refreshers.write().await.remove(stream_id);
    }

    /// Asks C5 for affected streams, then refreshes every one that still
    /// has subscribers and isn't closed, concurrently, awaiting them all.
    pub async fn notify_change(&self, change: DatabaseChange) {
        let affected = {
            let tracker = self.tracker.read().await;
            tracker.get_affected_streams(&change)
        };
        if affected.is_empty() {
            return;
        }

        let mut handles = Vec::with_capacity(affected.len());
        {
            let streams = self.streams.read().await;
            let refreshers = self.refreshers.read().await;
            for id in &affected {
                let Some(stream) = streams.get(id) else { continue };
                if stream.is_closed() || !stream.has_subscribers() {
                    continue;
                }
                if let Some(refresher) = refreshers.get(id) {
                    handles.push(refresher());
                }
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("reactive stream refresh task panicked: {}", e);
            }
        }
    }

    /// Removes streams with no subscribers or already closed, garbage
    /// collecting their dependency entries.
    pub async fn cleanup_inactive(&self) {
        let dead: Vec<String> = {
            let streams = self.streams.read().await;
            streams
                .iter()
                .filter(|(_, s)| s.is_closed() || !s.has_subscribers())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &dead {
            debug!("cleaning up inactive reactive stream '{}'", id);
            self.unregister(id).await;
        }
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }
}
