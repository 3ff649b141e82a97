// src/transport.rs

use std::sync::Arc;
use thiserror::Error;

use crate::integrity::IntegrityError;
use crate::request::{ManifestRequest, TransferRequest};

/// Errors reported for a single asset transfer or manifest request.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// The network dispatcher the downloader and prefetcher submit work to.
///
/// Implementations run requests on their own workers and report back through
/// [`TransferRequest::deliver`] / [`ManifestRequest::deliver`], once per request.
pub trait Transport: Send + Sync {
    /// Queues an asset transfer. Returns immediately.
    ///
    /// A request whose [`TransferRequest::begin`] returns `false` was canceled
    /// while queued and must be dropped without delivering.
    fn submit_transfer(&self, request: Arc<TransferRequest>);

    /// Queues a manifest request. An error means nothing was queued.
    fn submit_manifest(&self, request: Arc<ManifestRequest>) -> Result<(), TransferError>;
}
