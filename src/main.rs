// src/main.rs

use anyhow::{Context, Result};
use asset_loader::prelude::*;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const TICK: Duration = Duration::from_secs(60);

/// Usage: `asset_loader <cache-dir> [config.json] [base-url]`
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let cache_dir = PathBuf::from(args.next().unwrap_or_else(|| "asset-cache".to_string()));
    let config = match args.next() {
        Some(path) => SdkConfig::load(&path).with_context(|| format!("loading config from {path}"))?,
        None => SdkConfig::default(),
    };
    let mut options = TransportOptions::default();
    if let Some(base_url) = args.next() {
        options.base_url = base_url;
    }

    tokio::fs::create_dir_all(&cache_dir)
        .await
        .with_context(|| format!("creating {}", cache_dir.display()))?;
    info!("caching assets under {}", cache_dir.display());

    let config = ConfigHandle::new(config);
    let cache: Arc<dyn FileCache> = Arc::new(DiskCache::new(&cache_dir));
    let diagnostics: Arc<dyn Diagnostics> = Arc::new(LogDiagnostics);
    let dispatcher = Arc::new(HttpDispatcher::new(options, Handle::current())?);

    let downloader = Downloader::new(
        dispatcher.clone(),
        cache.clone(),
        config.clone(),
        diagnostics.clone(),
        CallbackExecutor::current(),
    );
    let identity = SdkIdentity::new(
        std::env::var("ASSET_LOADER_APP_ID").unwrap_or_else(|_| "demo-app".to_string()),
        std::env::var("ASSET_LOADER_APP_SIGNATURE").unwrap_or_default(),
    );
    let prefetcher = Prefetcher::new(
        downloader.clone(),
        dispatcher.clone(),
        cache,
        config,
        diagnostics,
        identity,
    );

    let mut ticker = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                prefetcher.prefetch();
                let evicted = downloader.reduce_cache_size();
                info!(
                    "prefetch {:?}, downloader {:?}, {} pending, {} evicted",
                    prefetcher.phase(),
                    downloader.state(),
                    downloader.pending_len(),
                    evicted
                );
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("unable to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    info!("shutting down");
    downloader.pause();
    dispatcher.shutdown();
    Ok(())
}
