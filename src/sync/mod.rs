//! Server Sync Manager (C7): drains the LWW engine's pending-operation
//! queue in batches, uploads them through a caller-supplied callback, and
//! retries transient failures with exponential backoff (spec.md §4.7).

use crate::errors::{AppError, AppResult};
use crate::lww::{LwwEngine, PendingOperation};
use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Caller-supplied upload: takes one batch and resolves once the server has
/// accepted it. Retryability is decided by [`is_permanent_failure`] against
/// the error's message, not by which `AppError` variant was returned: a
/// plain `AppError::Engine` (a network blip, say) is retried by default the
/// same as an explicit `AppError::sync_transient`. Only a message carrying a
/// permanent-failure marker (`unauthorized`, `forbidden`, `bad request`,
/// `not found`, `conflict`) or an explicit `AppError::sync_permanent` stops
/// retries early.
pub type UploadFn = Arc<dyn Fn(Vec<PendingOperation>) -> Pin<Box<dyn Future<Output = AppResult<()>> + Send>> + Send + Sync>;

/// Scans an upload-callback error message for a permanent-failure marker.
/// Case-insensitive; matches anywhere in the message, not just as a whole
/// word, since server error strings wrap these terms in varying phrasing
/// (`"401 Unauthorized"`, `"rejected: bad request"`, ...).
pub fn is_permanent_failure(message: &str) -> bool {
    const MARKERS: &[&str] = &["unauthorized", "forbidden", "bad request", "not found", "conflict"];
    let lower = message.to_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Optional status hook, invoked after every `sync_now` attempt (manual or
/// automatic) with the outcome.
pub type StatusFn = Arc<dyn Fn(&SyncResult) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerSyncOptions {
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub batch_size: usize,
    pub sync_interval: Duration,
}

impl Default for ServerSyncOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            batch_size: 50,
            sync_interval: Duration::from_secs(60),
        }
    }
}

impl ServerSyncOptions {
    pub fn with_retry_attempts(mut self, n: u32) -> Self {
        self.retry_attempts = n;
        self
    }

    pub fn with_retry_delay(mut self, d: Duration) -> Self {
        self.retry_delay = d;
        self
    }

    pub fn with_backoff_multiplier(mut self, m: f64) -> Self {
        self.backoff_multiplier = m;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_sync_interval(mut self, d: Duration) -> Self {
        self.sync_interval = d;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub success: bool,
    pub synced: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// Drains and uploads the pending-operation queue on demand or on a timer.
/// Only one `sync_now` may run at a time; a concurrent call is rejected
/// with a state error rather than interleaving batches.
pub struct SyncManager {
    lww: Arc<LwwEngine>,
    options: ServerSyncOptions,
    upload: UploadFn,
    status_hook: Option<StatusFn>,
    in_progress: AtomicBool,
    auto_sync_guard: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(lww: Arc<LwwEngine>, options: ServerSyncOptions, upload: UploadFn) -> Self {
        Self {
            lww,
            options,
            upload,
            status_hook: None,
            in_progress: AtomicBool::new(false),
            auto_sync_guard: AsyncMutex::new(None),
        }
    }

    pub fn with_status_hook(mut self, hook: StatusFn) -> Self {
        self.status_hook = Some(hook);
        self
    }

    /// Runs one sync pass: gathers unsynced pending operations, uploads
    /// them in `batch_size` chunks with per-batch retry/backoff, and marks
    /// every successfully uploaded operation synced before pruning them
    /// from the queue.
    pub async fn sync_now(&self) -> AppResult<SyncResult> {
        if self.in_progress.swap(true, AtomicOrdering::SeqCst) {
            return Err(AppError::state("a sync is already in progress"));
        }
        let result = self.run_sync().await;
        self.in_progress.store(false, AtomicOrdering::SeqCst);
        if let Some(hook) = &self.status_hook {
            hook(&result);
        }
        Ok(result)
    }

    async fn run_sync(&self) -> SyncResult {
        let pending: Vec<PendingOperation> = self.lww.pending_operations();

        if pending.is_empty() {
            debug!("sync_now: nothing pending");
            return SyncResult {
                success: true,
                synced: 0,
                failed: 0,
                error: None,
            };
        }

        let mut synced = 0usize;
        let mut failed = 0usize;
        let mut first_error: Option<String> = None;

        for batch in pending.chunks(self.options.batch_size.max(1)) {
            match self.upload_batch_with_retry(batch.to_vec()).await {
                Ok(()) => {
                    for op in batch {
                        self.lww.mark_synced(&op.id);
                    }
                    synced += batch.len();
                }
                Err(e) => {
                    warn!("sync batch of {} operations failed permanently: {}", batch.len(), e);
                    failed += batch.len();
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                }
            }
        }

        self.lww.remove_synced();
        info!("sync_now complete: {} synced, {} failed", synced, failed);
        SyncResult {
            success: failed == 0,
            synced,
            failed,
            error: first_error,
        }
    }

    /// Retries a single batch up to `retry_attempts` times with exponential
    /// backoff, stopping immediately on a non-retryable error.
    async fn upload_batch_with_retry(&self, batch: Vec<PendingOperation>) -> AppResult<()> {
        let mut delay = self.options.retry_delay;
        let mut attempt = 0u32;
        loop {
            match (self.upload)(batch.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.retry_attempts {
                        return Err(e);
                    }
                    debug!(
                        "sync batch attempt {} failed transiently ({}), retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    let next_millis = (delay.as_secs_f64() * self.options.backoff_multiplier).min(self.options.max_delay.as_secs_f64());
                    delay = Duration::from_secs_f64(next_millis);
                }
            }
        }
    }

    /// Starts a background task that syncs immediately, then again every
    /// `sync_interval`; a tick is skipped entirely if the previous sync is
    /// still running. Dropping or calling `stop_auto_sync` cancels it.
    pub async fn start_auto_sync(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = self.options.sync_interval;
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.sync_now().await {
                warn!("initial auto-sync failed: {}", e);
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                if manager.in_progress.load(AtomicOrdering::SeqCst) {
                    debug!("auto-sync tick skipped: sync already in progress");
                    continue;
                }
                if let Err(e) = manager.sync_now().await {
                    warn!("auto-sync failed: {}", e);
                }
            }
        });
        *self.auto_sync_guard.lock().await = Some(handle);
    }

    pub async fn stop_auto_sync(&self) {
        if let Some(handle) = self.auto_sync_guard.lock().await.take() {
            handle.abort();
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, Migrator};
    use crate::lww::UpdateLwwOptions;
    use crate::schema::{Column, Schema, Table};
    use crate::value::{TypeAffinity, Value};
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<LwwEngine>, Arc<Table>) {
        let table = Table::builder("notes")
            .auto_increment_primary_key("id")
            .column(Column::new("title", TypeAffinity::Text).lww())
            .build()
            .unwrap();
        let schema = Arc::new(Schema::builder().table(table.clone()).build().unwrap());
        let db = Arc::new(Database::open_in_memory().unwrap());
        Migrator::new().migrate(&db, &schema).unwrap();
        let lww = Arc::new(LwwEngine::new(db, schema).unwrap());
        (lww, Arc::new(table))
    }

    fn seed_pending(lww: &Arc<LwwEngine>, table: &Table) {
        let conn_db = lww.clone();
        let pk = vec![Value::Integer(1)];
        conn_db
            .update_lww_column(table, &pk, "title", Value::Text("hello".into()), UpdateLwwOptions::default())
            .unwrap();
    }

    #[tokio::test]
    async fn sync_now_uploads_pending_and_marks_synced() {
        let (lww, table) = setup();
        seed_pending(&lww, &table);
        assert_eq!(lww.pending_operations().iter().filter(|p| !p.synced).count(), 1);

        let upload: UploadFn = Arc::new(|_batch| Box::pin(async { Ok(()) }));
        let manager = SyncManager::new(lww.clone(), ServerSyncOptions::default(), upload);
        let result = manager.sync_now().await.unwrap();
        assert!(result.success);
        assert_eq!(result.synced, 1);
        assert_eq!(lww.pending_operations().len(), 0);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let (lww, table) = setup();
        seed_pending(&lww, &table);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = attempts.clone();
        let upload: UploadFn = Arc::new(move |_batch| {
            let counted = counted.clone();
            Box::pin(async move {
                let n = counted.fetch_add(1, AtomicOrdering::SeqCst);
                if n < 2 {
                    Err(AppError::sync_transient("connection reset"))
                } else {
                    Ok(())
                }
            })
        });
        let options = ServerSyncOptions::default()
            .with_retry_attempts(5)
            .with_retry_delay(Duration::from_millis(1));
        let manager = SyncManager::new(lww.clone(), options, upload);
        let result = manager.sync_now().await.unwrap();
        assert!(result.success);
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let (lww, table) = setup();
        seed_pending(&lww, &table);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = attempts.clone();
        let upload: UploadFn = Arc::new(move |_batch| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, AtomicOrdering::SeqCst);
                Err(AppError::sync_permanent("unauthorized"))
            })
        });
        let manager = SyncManager::new(lww.clone(), ServerSyncOptions::default(), upload);
        let result = manager.sync_now().await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 1);
        // Failed operations stay queued for the next sync attempt.
        assert_eq!(lww.pending_operations().len(), 1);
    }

    #[tokio::test]
    async fn ordinary_engine_errors_retry_by_default() {
        let (lww, table) = setup();
        seed_pending(&lww, &table);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = attempts.clone();
        let upload: UploadFn = Arc::new(move |_batch| {
            let counted = counted.clone();
            Box::pin(async move {
                let n = counted.fetch_add(1, AtomicOrdering::SeqCst);
                if n < 1 {
                    Err(AppError::engine("connection reset"))
                } else {
                    Ok(())
                }
            })
        });
        let options = ServerSyncOptions::default().with_retry_delay(Duration::from_millis(1));
        let manager = SyncManager::new(lww.clone(), options, upload);
        let result = manager.sync_now().await.unwrap();
        assert!(result.success);
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn engine_error_with_permanent_marker_is_not_retried() {
        let (lww, table) = setup();
        seed_pending(&lww, &table);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = attempts.clone();
        let upload: UploadFn = Arc::new(move |_batch| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, AtomicOrdering::SeqCst);
                Err(AppError::engine("server replied 404 Not Found"))
            })
        });
        let manager = SyncManager::new(lww.clone(), ServerSyncOptions::default(), upload);
        let result = manager.sync_now().await.unwrap();
        assert!(!result.success);
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn is_permanent_failure_matches_known_markers() {
        assert!(is_permanent_failure("401 Unauthorized"));
        assert!(is_permanent_failure("rejected: Bad Request"));
        assert!(is_permanent_failure("409 Conflict"));
        assert!(!is_permanent_failure("connection reset"));
        assert!(!is_permanent_failure("timeout waiting for response"));
    }

    #[tokio::test]
    async fn concurrent_sync_now_is_rejected() {
        let (lww, table) = setup();
        seed_pending(&lww, &table);
        let upload: UploadFn = Arc::new(|_batch| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        });
        let manager = Arc::new(SyncManager::new(lww, ServerSyncOptions::default(), upload));
        let m2 = manager.clone();
        let first = tokio::spawn(async move { m2.sync_now().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager.sync_now().await;
        assert!(matches!(second, Err(AppError::State { .. })));
        first.await.unwrap().unwrap();
    }
}
