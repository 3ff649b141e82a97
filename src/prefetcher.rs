// src/prefetcher.rs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::cache::{self, FileCache};
use crate::config::{ConfigHandle, SdkConfig};
use crate::diagnostics::Diagnostics;
use crate::downloader::Downloader;
use crate::manifest::{self, VIDEOS_DIR};
use crate::models::{BatchCounter, Priority};
use crate::request::{ManifestListener, ManifestRequest};
use crate::transport::{TransferError, Transport};

/// Which kind of assets a cycle prefetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrefetchMode {
    Video,
    WebView,
}

impl PrefetchMode {
    /// Mode the configuration asks for, or `None` while prefetching is disabled.
    pub fn select(config: &SdkConfig) -> Option<Self> {
        if config.publisher_disabled || config.prefetch_disabled {
            None
        } else if config.webview_enabled {
            Some(PrefetchMode::WebView)
        } else {
            Some(PrefetchMode::Video)
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            PrefetchMode::Video => "/api/video-prefetch",
            PrefetchMode::WebView => "/webview/v2/prefetch",
        }
    }
}

/// Identifies the embedding app to the ad server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkIdentity {
    pub app_id: String,
    pub app_signature: String,
    pub sdk_version: String,
}

impl SdkIdentity {
    pub fn new(app_id: impl Into<String>, app_signature: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_signature: app_signature.into(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Observable phase of the prefetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefetchPhase {
    Idle,
    AwaitResponse,
    Download,
    Cooldown,
}

enum Phase {
    Idle,
    AwaitResponse { request: Arc<ManifestRequest> },
    Download { batch: Arc<BatchCounter> },
    Cooldown,
}

/// End of the cooldown armed by the last manifest request.
#[derive(Debug, Clone, Copy)]
enum CooldownEnd {
    At(Instant),
    /// The configured cooldown does not fit in an `Instant`.
    Never,
}

struct Inner {
    phase: Phase,
    /// Mode of the cycle in progress.
    mode: Option<PrefetchMode>,
    cooldown: Option<CooldownEnd>,
}

impl Inner {
    fn is_awaiting(&self, request: &ManifestRequest) -> bool {
        matches!(&self.phase, Phase::AwaitResponse { request: r } if r.id() == request.id())
    }

    fn cooling_down(&self, now: Instant) -> bool {
        match self.cooldown {
            Some(CooldownEnd::At(until)) => now < until,
            Some(CooldownEnd::Never) => true,
            None => false,
        }
    }

    /// Drops back to idle without a cooldown. Returns the batch to cancel, if any.
    fn reset(&mut self) -> Option<Arc<BatchCounter>> {
        let previous = std::mem::replace(&mut self.phase, Phase::Idle);
        self.mode = None;
        self.cooldown = None;
        match previous {
            Phase::Download { batch } => Some(batch),
            _ => None,
        }
    }
}

/// Drives prefetch cycles against a [`Downloader`].
pub struct Prefetcher {
    inner: Mutex<Inner>,
    downloader: Arc<Downloader>,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn FileCache>,
    config: ConfigHandle,
    diagnostics: Arc<dyn Diagnostics>,
    identity: SdkIdentity,
    this: Weak<Prefetcher>,
}

impl Prefetcher {
    pub fn new(
        downloader: Arc<Downloader>,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn FileCache>,
        config: ConfigHandle,
        diagnostics: Arc<dyn Diagnostics>,
        identity: SdkIdentity,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                mode: None,
                cooldown: None,
            }),
            downloader,
            transport,
            cache,
            config,
            diagnostics,
            identity,
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> PrefetchPhase {
        match self.lock().phase {
            Phase::Idle => PrefetchPhase::Idle,
            Phase::AwaitResponse { .. } => PrefetchPhase::AwaitResponse,
            Phase::Download { .. } => PrefetchPhase::Download,
            Phase::Cooldown => PrefetchPhase::Cooldown,
        }
    }

    pub fn mode(&self) -> Option<PrefetchMode> {
        self.lock().mode
    }

    /// Advances the cycle. Safe to call as often as wanted, e.g. from a timer.
    pub fn prefetch(&self) {
        let config = self.config.snapshot();
        let selected = PrefetchMode::select(&config);

        let mut canceled = None;
        let request = {
            let mut inner = self.lock();
            match selected {
                None => {
                    if inner.mode.is_some() {
                        info!("prefetch disabled, abandoning the current cycle");
                    }
                    canceled = inner.reset();
                    None
                }
                Some(mode) => {
                    if inner.mode.is_some_and(|m| m != mode) {
                        info!("prefetch mode switched to {:?}", mode);
                        canceled = inner.reset();
                    }
                    inner.mode = Some(mode);
                    self.advance(&mut inner, mode, &config)
                }
            }
        };

        if let Some(batch) = canceled {
            self.downloader.cancel_batch(&batch);
        }
        let Some(request) = request else {
            return;
        };

        debug!("requesting {:?} prefetch manifest", request.mode());
        if let Err(e) = self.transport.submit_manifest(request.clone()) {
            self.diagnostics.manifest_failed(request.mode(), &e);
            let mut inner = self.lock();
            if inner.is_awaiting(&request) {
                inner.phase = Phase::Cooldown;
            }
        }
    }

    /// Runs the phase transitions. Returns a manifest request to submit once unlocked.
    fn advance(&self, inner: &mut Inner, mode: PrefetchMode, config: &SdkConfig) -> Option<Arc<ManifestRequest>> {
        if let Phase::Download { batch } = &inner.phase {
            if batch.remaining() > 0 {
                return None;
            }
            debug!("prefetch batch {} drained", batch.id());
            inner.phase = Phase::Cooldown;
        }
        match inner.phase {
            Phase::AwaitResponse { .. } | Phase::Download { .. } => return None,
            Phase::Cooldown => {
                if inner.cooling_down(Instant::now()) {
                    return None;
                }
                inner.phase = Phase::Idle;
            }
            Phase::Idle => {}
        }

        let listener: Weak<dyn ManifestListener> = self.this.clone();
        let request = ManifestRequest::new(mode, self.manifest_body(mode), listener);
        inner.phase = Phase::AwaitResponse {
            request: request.clone(),
        };
        let cooldown = config.prefetch_cooldown();
        inner.cooldown = Some(match Instant::now().checked_add(cooldown) {
            Some(until) => CooldownEnd::At(until),
            None => {
                warn!("prefetch cooldown of {:?} never expires", cooldown);
                CooldownEnd::Never
            }
        });
        Some(request)
    }

    fn manifest_body(&self, mode: PrefetchMode) -> Value {
        let mut body = json!({
            "app_id": self.identity.app_id,
            "app_signature": self.identity.app_signature,
            "sdk_version": self.identity.sdk_version,
        });
        let mut listing = cache::inventory(&self.cache.locations());
        match mode {
            PrefetchMode::Video => {
                body["local-videos"] = json!(listing.remove(VIDEOS_DIR).unwrap_or_default());
            }
            PrefetchMode::WebView => body["cache_assets"] = json!(listing),
        }
        body
    }
}

impl ManifestListener for Prefetcher {
    fn on_manifest_success(&self, request: &Arc<ManifestRequest>, body: Value) {
        if !self.lock().is_awaiting(request) {
            debug!("ignoring response to stale manifest request {}", request.id());
            return;
        }
        let manifest = manifest::parse(request.mode(), &body);
        info!(
            "{:?} prefetch returned {} assets",
            request.mode(),
            manifest.assets.len()
        );

        // Registered before the phase flips so the drain check never sees an empty counter.
        let batch = BatchCounter::new();
        self.downloader
            .submit_batch(Priority::Low, manifest.assets, &batch, None, "prefetch");

        let mut inner = self.lock();
        if inner.is_awaiting(request) {
            inner.phase = Phase::Download { batch };
        } else {
            drop(inner);
            debug!("prefetch cycle reset while submitting batch {}", batch.id());
            self.downloader.cancel_batch(&batch);
        }
    }

    fn on_manifest_failure(&self, request: &Arc<ManifestRequest>, error: TransferError) {
        self.diagnostics.manifest_failed(request.mode(), &error);
        let mut inner = self.lock();
        if inner.is_awaiting(request) {
            inner.phase = Phase::Cooldown;
        }
    }
}
