// src/models.rs

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::callback::{CallbackCell, CallbackExecutor};

/// Value stored in a [`BatchCounter`] once its batch has been canceled.
pub const CANCELED: i32 = i32::MIN;

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Download urgency. Lower values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Immediate = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// One file referenced by a manifest or an ad response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Cache subdirectory, e.g. `videos` or `html`.
    pub media_type: String,
    pub filename: String,
    pub url: String,
    /// Optional SHA-256 checksum, verified by the dispatcher after download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl AssetDescriptor {
    pub fn new(
        media_type: impl Into<String>,
        filename: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            media_type: media_type.into(),
            filename: filename.into(),
            url: url.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// Completion state shared by every item of one batch.
///
/// The counter holds the number of items still outstanding. It reaches zero
/// when the batch is complete and holds [`CANCELED`] once the batch has been
/// canceled, after which it is never read as a count again.
#[derive(Debug)]
pub struct BatchCounter {
    id: u64,
    remaining: AtomicI32,
    processing_ms: AtomicU64,
}

impl BatchCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            remaining: AtomicI32::new(0),
            processing_ms: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Items still outstanding, or [`CANCELED`].
    pub fn remaining(&self) -> i32 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_canceled(&self) -> bool {
        self.remaining() == CANCELED
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Whether queued items of this batch should still be downloaded.
    pub(crate) fn is_live(&self) -> bool {
        self.remaining() > 0
    }

    /// Marks the batch canceled. Idempotent.
    pub fn cancel(&self) {
        self.remaining.store(CANCELED, Ordering::Release);
    }

    /// Total time spent on network transfers for this batch.
    pub fn processing_time(&self) -> Duration {
        Duration::from_millis(self.processing_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn add_processing_time(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.processing_ms.fetch_add(millis, Ordering::Relaxed);
    }

    /// Counts one more item into the batch. Returns `false` if canceled.
    pub(crate) fn register(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v >= 0).then(|| v.saturating_add(1))
            })
            .is_ok()
    }

    /// Counts one item out of the batch and returns the remaining count.
    ///
    /// Returns `None` once the batch is canceled; the sentinel is never decremented.
    pub(crate) fn complete_one(&self) -> Option<i32> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| (v > 0).then(|| v - 1))
            .ok()
            .map(|previous| previous - 1)
    }
}

/// One file to download, wired to its batch.
#[derive(Clone)]
pub struct AssetItem {
    priority: Priority,
    descriptor: AssetDescriptor,
    batch: Arc<BatchCounter>,
    callback: Arc<CallbackCell>,
    label: Arc<str>,
}

impl AssetItem {
    /// Registers a new item into `batch`. Returns `None` when the batch is already canceled.
    pub(crate) fn register(
        priority: Priority,
        descriptor: AssetDescriptor,
        batch: &Arc<BatchCounter>,
        callback: &Arc<CallbackCell>,
        label: &Arc<str>,
    ) -> Option<Self> {
        if !batch.register() {
            return None;
        }
        Some(Self {
            priority,
            descriptor,
            batch: batch.clone(),
            callback: callback.clone(),
            label: label.clone(),
        })
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn descriptor(&self) -> &AssetDescriptor {
        &self.descriptor
    }

    pub fn url(&self) -> &str {
        &self.descriptor.url
    }

    pub fn batch(&self) -> &Arc<BatchCounter> {
        &self.batch
    }

    /// Ad context this item was requested for, used in diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Counts this item out of its batch and delivers the batch callback if due.
    ///
    /// The callback fires when the last item finishes, or early with `false`
    /// on the first failure. Later completions still count down but never
    /// deliver again.
    pub(crate) fn finish(&self, success: bool, executor: &CallbackExecutor) {
        let Some(remaining) = self.batch.complete_one() else {
            log::debug!("{} finished after batch {} was canceled", self.url(), self.batch.id());
            return;
        };
        if remaining == 0 || !success {
            if let Some(callback) = self.callback.claim() {
                executor.dispatch(callback, success);
            }
        }
    }
}

impl std::fmt::Debug for AssetItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetItem")
            .field("priority", &self.priority)
            .field("descriptor", &self.descriptor)
            .field("batch", &self.batch.id())
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_urgent_first() {
        assert!(Priority::Immediate < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn counter_counts_registrations_and_completions() {
        let batch = BatchCounter::new();
        assert!(batch.register());
        assert!(batch.register());
        assert_eq!(batch.remaining(), 2);
        assert_eq!(batch.complete_one(), Some(1));
        assert_eq!(batch.complete_one(), Some(0));
        assert!(batch.is_complete());
        // Never goes below zero.
        assert_eq!(batch.complete_one(), None);
        assert_eq!(batch.remaining(), 0);
    }

    #[test]
    fn canceled_counter_stays_canceled() {
        let batch = BatchCounter::new();
        batch.register();
        batch.register();
        batch.cancel();
        assert!(batch.is_canceled());
        assert_eq!(batch.complete_one(), None);
        assert!(!batch.register());
        assert_eq!(batch.remaining(), CANCELED);
        assert!(!batch.is_live());
    }

    #[test]
    fn batch_ids_are_unique() {
        let a = BatchCounter::new();
        let b = BatchCounter::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn processing_time_accumulates() {
        let batch = BatchCounter::new();
        batch.add_processing_time(Duration::from_millis(40));
        batch.add_processing_time(Duration::from_millis(60));
        assert_eq!(batch.processing_time(), Duration::from_millis(100));
    }
}
