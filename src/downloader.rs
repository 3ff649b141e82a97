// src/downloader.rs

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::SystemTime;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache::{self, FileCache};
use crate::callback::{BatchCallback, CallbackCell, CallbackExecutor};
use crate::config::ConfigHandle;
use crate::diagnostics::Diagnostics;
use crate::models::{AssetDescriptor, AssetItem, BatchCounter, Priority};
use crate::queue::PendingQueue;
use crate::request::{TransferListener, TransferRequest};
use crate::transport::{TransferError, Transport};

/// Scheduler state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadState {
    /// Nothing active and nothing pending.
    Idle,
    /// Exactly one transfer is active.
    Downloading,
    /// Pause requested while the active transfer was already running.
    Pausing,
    /// Nothing active; pending items wait for [`Downloader::resume`].
    Paused,
}

struct Inner {
    state: DownloadState,
    pending: PendingQueue,
    active: Option<Arc<TransferRequest>>,
}

/// Schedules asset transfers one at a time.
pub struct Downloader {
    inner: Mutex<Inner>,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn FileCache>,
    config: ConfigHandle,
    diagnostics: Arc<dyn Diagnostics>,
    executor: CallbackExecutor,
    this: Weak<Downloader>,
}

impl Downloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<dyn FileCache>,
        config: ConfigHandle,
        diagnostics: Arc<dyn Diagnostics>,
        executor: CallbackExecutor,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inner: Mutex::new(Inner {
                state: DownloadState::Idle,
                pending: PendingQueue::new(),
                active: None,
            }),
            transport,
            cache,
            config,
            diagnostics,
            executor,
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DownloadState {
        self.lock().state
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Source urls of the queued items.
    pub fn pending_urls(&self) -> Vec<String> {
        self.lock().pending.urls()
    }

    pub fn active_request(&self) -> Option<Arc<TransferRequest>> {
        self.lock().active.clone()
    }

    /// Queues `assets` as part of `batch`.
    ///
    /// The batch counter goes up by one per asset. `callback` fires once,
    /// with `true` after every asset succeeded or with `false` on the first
    /// failure, and never if the batch is canceled.
    pub fn submit_batch(
        &self,
        priority: Priority,
        assets: Vec<AssetDescriptor>,
        batch: &Arc<BatchCounter>,
        callback: Option<BatchCallback>,
        label: &str,
    ) {
        let callback = Arc::new(CallbackCell::new(callback));
        let label: Arc<str> = Arc::from(label);

        let submission = {
            let mut inner = self.lock();
            let count = assets.len();
            for descriptor in assets {
                match AssetItem::register(priority, descriptor, batch, &callback, &label) {
                    Some(item) => inner.pending.push(item),
                    None => debug!("batch {} canceled while submitting", batch.id()),
                }
            }
            info!(
                "[{}] queued {} assets for batch {} ({:?})",
                label,
                count,
                batch.id(),
                inner.state
            );
            match inner.state {
                DownloadState::Idle | DownloadState::Downloading => self.try_submit(&mut inner),
                DownloadState::Pausing | DownloadState::Paused => None,
            }
        };
        self.submit(submission);
    }

    /// Cancels every queued and active item of `batch`. Its callback never fires.
    ///
    /// An active transfer the transport already started runs to completion and
    /// its result is discarded.
    pub fn cancel_batch(&self, batch: &BatchCounter) {
        batch.cancel();
        let submission = {
            let mut inner = self.lock();
            let dropped = inner
                .active
                .as_ref()
                .is_some_and(|a| a.item().batch().id() == batch.id() && a.cancel());
            if dropped {
                info!("canceled active transfer of batch {}", batch.id());
                inner.active = None;
                self.try_submit(&mut inner)
            } else {
                None
            }
        };
        self.submit(submission);
    }

    pub fn pause(&self) {
        let mut inner = self.lock();
        match inner.state {
            DownloadState::Idle => inner.state = DownloadState::Paused,
            DownloadState::Downloading => match inner.active.clone() {
                Some(active) if active.cancel() => {
                    inner.pending.push(active.item().clone());
                    inner.active = None;
                    inner.state = DownloadState::Paused;
                }
                Some(_) => inner.state = DownloadState::Pausing,
                None => inner.state = DownloadState::Paused,
            },
            DownloadState::Pausing | DownloadState::Paused => {}
        }
        info!("pause -> {:?}", inner.state);
    }

    pub fn resume(&self) {
        let submission = {
            let mut inner = self.lock();
            let submission = match inner.state {
                DownloadState::Idle | DownloadState::Downloading => None,
                DownloadState::Pausing => {
                    inner.state = DownloadState::Downloading;
                    None
                }
                DownloadState::Paused if inner.pending.is_empty() => {
                    inner.state = DownloadState::Idle;
                    None
                }
                DownloadState::Paused => {
                    inner.state = DownloadState::Downloading;
                    self.try_submit(&mut inner)
                }
            };
            info!("resume -> {:?}", inner.state);
            submission
        };
        self.submit(submission);
    }

    /// Evicts stale and over-budget files from the cache.
    ///
    /// Only runs while idle, since any other state may have a file mid-write.
    /// Returns the number of files deleted.
    pub fn reduce_cache_size(&self) -> usize {
        let inner = self.lock();
        if inner.state != DownloadState::Idle {
            debug!("skipping cache trim while {:?}", inner.state);
            return 0;
        }
        let config = self.config.snapshot();
        let deleted = cache::trim(self.cache.as_ref(), &config, SystemTime::now());
        drop(inner);
        deleted.len()
    }

    /// Restores the scheduler invariants after the queue or active slot changed.
    ///
    /// Never moves into or out of `Pausing`/`Paused`; callers only invoke it
    /// from `Idle` or `Downloading`. Returns a request to hand to the transport
    /// once the lock is released.
    fn try_submit(&self, inner: &mut Inner) -> Option<Arc<TransferRequest>> {
        if let (Some(active), Some(next)) = (&inner.active, inner.pending.peek_priority()) {
            if next < active.priority() && active.cancel() {
                debug!("preempting {} for a {:?} item", active.url(), next);
                let item = active.item().clone();
                inner.pending.push(item);
                inner.active = None;
            }
        }

        let mut submission = None;
        while inner.active.is_none() {
            let Some(item) = inner.pending.pop() else {
                break;
            };
            if !item.batch().is_live() {
                debug!("skipping {} from canceled batch {}", item.url(), item.batch().id());
                continue;
            }
            let Some(destination) = self.prepare_destination(&item) else {
                continue;
            };
            if destination.exists() {
                debug!("{} already cached", destination.display());
                self.cache.touch(&destination);
                item.finish(true, &self.executor);
                continue;
            }
            let listener: Weak<dyn TransferListener> = self.this.clone();
            let request = TransferRequest::new(item, destination, listener);
            inner.active = Some(request.clone());
            submission = Some(request);
        }

        inner.state = if inner.active.is_some() {
            DownloadState::Downloading
        } else {
            DownloadState::Idle
        };
        submission
    }

    /// Resolves and creates the item's directory. Finishes the item as failed if that fails.
    fn prepare_destination(&self, item: &AssetItem) -> Option<PathBuf> {
        let descriptor = item.descriptor();
        let dir = self.cache.locations().base_dir.join(&descriptor.media_type);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("cannot create {}: {}", dir.display(), e);
            self.diagnostics
                .asset_failed(item.label(), item.url(), &TransferError::Io(e));
            item.finish(false, &self.executor);
            return None;
        }
        Some(dir.join(&descriptor.filename))
    }

    fn submit(&self, submission: Option<Arc<TransferRequest>>) {
        if let Some(request) = submission {
            debug!("submitting transfer {} for {}", request.id(), request.url());
            self.transport.submit_transfer(request);
        }
    }
}

impl TransferListener for Downloader {
    fn on_transfer_result(&self, request: &Arc<TransferRequest>, result: Result<(), TransferError>) {
        let submission = {
            let mut inner = self.lock();
            if matches!(inner.state, DownloadState::Idle | DownloadState::Paused) {
                debug!("ignoring result for {} while {:?}", request.url(), inner.state);
                return;
            }
            let is_active = inner.active.as_ref().is_some_and(|a| a.id() == request.id());
            if !is_active {
                debug!("ignoring stale result for {}", request.url());
                return;
            }
            inner.active = None;

            let item = request.item();
            item.batch().add_processing_time(request.elapsed());
            if let Err(e) = &result {
                self.diagnostics.asset_failed(item.label(), item.url(), e);
            }
            item.finish(result.is_ok(), &self.executor);

            if inner.state == DownloadState::Pausing {
                inner.state = DownloadState::Paused;
                None
            } else {
                self.try_submit(&mut inner)
            }
        };
        self.submit(submission);
    }
}
