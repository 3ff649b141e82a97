pub mod cache;
pub mod callback;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod downloader;
pub mod integrity;
pub mod manifest;
pub mod models;
pub mod prefetcher;
pub mod queue;
pub mod request;
pub mod transport;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::cache::{CacheLocations, DiskCache, FileCache};
    pub use crate::callback::{BatchCallback, CallbackExecutor};
    pub use crate::config::{ConfigHandle, SdkConfig};
    pub use crate::diagnostics::{Diagnostics, LogDiagnostics};
    pub use crate::dispatcher::{HttpDispatcher, TransportOptions};
    pub use crate::downloader::{DownloadState, Downloader};
    pub use crate::models::{AssetDescriptor, BatchCounter, Priority};
    pub use crate::prefetcher::{PrefetchMode, PrefetchPhase, Prefetcher, SdkIdentity};
    pub use crate::request::{ManifestRequest, TransferRequest, TransferStatus};
    pub use crate::transport::{TransferError, Transport};
}
