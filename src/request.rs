// src/request.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::models::{AssetItem, Priority};
use crate::prefetcher::PrefetchMode;
use crate::transport::TransferError;

const QUEUED: u8 = 0;
const PROCESSING: u8 = 1;
const COMPLETE: u8 = 2;
const CANCELED: u8 = 3;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`TransferRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Queued,
    Processing,
    Complete,
    Canceled,
}

impl TransferStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            QUEUED => TransferStatus::Queued,
            PROCESSING => TransferStatus::Processing,
            COMPLETE => TransferStatus::Complete,
            _ => TransferStatus::Canceled,
        }
    }
}

/// Receives the outcome of a transfer.
pub trait TransferListener: Send + Sync {
    fn on_transfer_result(&self, request: &Arc<TransferRequest>, result: Result<(), TransferError>);
}

/// Receives the outcome of a manifest request.
pub trait ManifestListener: Send + Sync {
    fn on_manifest_success(&self, request: &Arc<ManifestRequest>, body: Value);
    fn on_manifest_failure(&self, request: &Arc<ManifestRequest>, error: TransferError);
}

/// An asset download in flight.
pub struct TransferRequest {
    id: u64,
    item: AssetItem,
    destination: PathBuf,
    status: AtomicU8,
    started: OnceLock<Instant>,
    elapsed_ms: AtomicU64,
    listener: Weak<dyn TransferListener>,
}

impl TransferRequest {
    pub fn new(item: AssetItem, destination: PathBuf, listener: Weak<dyn TransferListener>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            item,
            destination,
            status: AtomicU8::new(QUEUED),
            started: OnceLock::new(),
            elapsed_ms: AtomicU64::new(0),
            listener,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn item(&self) -> &AssetItem {
        &self.item
    }

    pub fn priority(&self) -> Priority {
        self.item.priority()
    }

    pub fn url(&self) -> &str {
        self.item.url()
    }

    /// Final location of the file once the transfer succeeds.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn status(&self) -> TransferStatus {
        TransferStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Cancels the request if the transport has not started it yet.
    pub fn cancel(&self) -> bool {
        self.status
            .compare_exchange(QUEUED, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called by the transport right before it starts transferring.
    ///
    /// Returns `false` if the request was canceled while queued.
    pub fn begin(&self) -> bool {
        let started = self
            .status
            .compare_exchange(QUEUED, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            let _ = self.started.set(Instant::now());
        }
        started
    }

    /// Time between [`begin`](Self::begin) and delivery of the result.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::Acquire))
    }

    /// Reports the outcome to the owner. Only the first delivery counts.
    pub fn deliver(self: &Arc<Self>, result: Result<(), TransferError>) {
        let claimed = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                matches!(s, QUEUED | PROCESSING).then_some(COMPLETE)
            })
            .is_ok();
        if !claimed {
            log::debug!("dropping result for transfer {} ({:?})", self.id, self.status());
            return;
        }
        if let Some(started) = self.started.get() {
            let millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.elapsed_ms.store(millis, Ordering::Release);
        }
        match self.listener.upgrade() {
            Some(listener) => listener.on_transfer_result(self, result),
            None => log::debug!("transfer {} finished after its downloader was dropped", self.id),
        }
    }
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("id", &self.id)
            .field("url", &self.url())
            .field("destination", &self.destination)
            .field("status", &self.status())
            .finish()
    }
}

/// A request for the list of assets to prefetch.
pub struct ManifestRequest {
    id: u64,
    mode: PrefetchMode,
    body: Value,
    delivered: AtomicBool,
    listener: Weak<dyn ManifestListener>,
}

impl ManifestRequest {
    pub fn new(mode: PrefetchMode, body: Value, listener: Weak<dyn ManifestListener>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            mode,
            body,
            delivered: AtomicBool::new(false),
            listener,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> PrefetchMode {
        self.mode
    }

    /// Path of the endpoint, relative to the transport's base url.
    pub fn endpoint(&self) -> &'static str {
        self.mode.endpoint()
    }

    /// JSON body to post.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Reports the outcome to the owner. Only the first delivery counts.
    pub fn deliver(self: &Arc<Self>, result: Result<Value, TransferError>) {
        if self.delivered.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(listener) = self.listener.upgrade() else {
            return;
        };
        match result {
            Ok(body) => listener.on_manifest_success(self, body),
            Err(e) => listener.on_manifest_failure(self, e),
        }
    }
}

impl std::fmt::Debug for ManifestRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestRequest")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish()
    }
}
