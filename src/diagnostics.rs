use log::{error, warn};

use crate::prefetcher::PrefetchMode;
use crate::transport::TransferError;

/// Receives per-item failure detail that never reaches batch callbacks.
pub trait Diagnostics: Send + Sync {
    /// An asset could not be downloaded or stored.
    fn asset_failed(&self, label: &str, url: &str, error: &TransferError);

    /// A manifest request failed or could not be submitted.
    fn manifest_failed(&self, mode: PrefetchMode, error: &TransferError);
}

/// [`Diagnostics`] that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn asset_failed(&self, label: &str, url: &str, error: &TransferError) {
        warn!("[{}] asset download failed for {}: {}", label, url, error);
    }

    fn manifest_failed(&self, mode: PrefetchMode, error: &TransferError) {
        error!("{:?} prefetch request failed: {}", mode, error);
    }
}
