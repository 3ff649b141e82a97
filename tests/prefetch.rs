mod common;

use std::sync::Arc;
use std::time::Duration;

use asset_loader::prelude::*;
use common::*;
use serde_json::json;

struct Harness {
    dir: tempfile::TempDir,
    transport: Arc<MockTransport>,
    downloader: Arc<Downloader>,
    prefetcher: Arc<Prefetcher>,
}

fn harness(config: SdkConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigHandle::new(config);
    let transport = Arc::new(MockTransport::default());
    let cache: Arc<dyn FileCache> = Arc::new(DiskCache::new(dir.path()));
    let downloader = Downloader::new(
        transport.clone(),
        cache.clone(),
        config.clone(),
        Arc::new(LogDiagnostics),
        CallbackExecutor::current(),
    );
    let prefetcher = Prefetcher::new(
        downloader.clone(),
        transport.clone(),
        cache,
        config,
        Arc::new(LogDiagnostics),
        SdkIdentity::new("app-1", "sig"),
    );
    Harness {
        dir,
        transport,
        downloader,
        prefetcher,
    }
}

fn deliver_videos(h: &Harness, names: &[&str]) {
    let videos: Vec<_> = names
        .iter()
        .map(|n| json!({"name": n, "value": format!("https://cdn.example/{n}")}))
        .collect();
    let request = h.transport.manifests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(request.mode(), PrefetchMode::Video);
    request.deliver(Ok(json!({ "videos": videos })));
}

fn video_config() -> SdkConfig {
    SdkConfig {
        webview_enabled: false,
        prefetch_cooldown_minutes: 5,
        ..SdkConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn ad_assets_jump_ahead_of_prefetched_videos() {
    let h = harness(video_config());
    h.prefetcher.prefetch();
    deliver_videos(&h, &["p1.mp4", "p2.mp4"]);
    let prefetching = h.downloader.active_request().unwrap();
    assert_eq!(prefetching.priority(), Priority::Low);

    let (callback, mut rx) = callback_channel();
    let ad = BatchCounter::new();
    h.downloader
        .submit_batch(Priority::Immediate, vec![image("ad.png")], &ad, Some(callback), "ad");
    assert_eq!(prefetching.status(), TransferStatus::Canceled);

    complete(&h.downloader.active_request().unwrap(), true);
    assert_eq!(next_result(&mut rx).await, Some(true));

    // The prefetch batch is still draining.
    h.prefetcher.prefetch();
    assert_eq!(h.prefetcher.phase(), PrefetchPhase::Download);
    while let Some(active) = h.downloader.active_request() {
        assert_eq!(active.priority(), Priority::Low);
        complete(&active, true);
    }
    h.prefetcher.prefetch();
    assert_eq!(h.prefetcher.phase(), PrefetchPhase::Cooldown);
}

#[tokio::test(start_paused = true)]
async fn paused_downloader_holds_the_cycle_in_download() {
    let h = harness(video_config());
    h.prefetcher.prefetch();
    deliver_videos(&h, &["p1.mp4"]);
    h.downloader.pause();

    tokio::time::advance(Duration::from_secs(3600)).await;
    h.prefetcher.prefetch();
    assert_eq!(h.prefetcher.phase(), PrefetchPhase::Download);
    assert_eq!(h.transport.manifests.lock().unwrap().len(), 1);

    h.downloader.resume();
    complete(&h.downloader.active_request().unwrap(), true);
    // The cooldown was armed when the manifest went out and has long passed.
    h.prefetcher.prefetch();
    assert_eq!(h.prefetcher.phase(), PrefetchPhase::AwaitResponse);
    assert_eq!(h.transport.manifests.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn video_request_lists_cached_videos() {
    let h = harness(video_config());
    let videos = h.dir.path().join("videos");
    std::fs::create_dir_all(&videos).unwrap();
    std::fs::write(videos.join("cached.mp4"), b"mp4").unwrap();

    h.prefetcher.prefetch();
    let request = h.transport.manifests.lock().unwrap()[0].clone();
    assert_eq!(request.body()["local-videos"], json!(["cached.mp4"]));
    assert_eq!(request.body()["app_signature"], "sig");

    // Already-cached entries complete without a transfer.
    deliver_videos(&h, &["cached.mp4", "new.mp4"]);
    let active = h.downloader.active_request().unwrap();
    assert_eq!(active.url(), "https://cdn.example/new.mp4");
    assert_eq!(h.transport.transfer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn publisher_kill_switch_stops_prefetching() {
    let h = harness(SdkConfig {
        publisher_disabled: true,
        ..SdkConfig::default()
    });
    h.prefetcher.prefetch();
    assert_eq!(h.prefetcher.phase(), PrefetchPhase::Idle);
    assert!(h.transport.manifests.lock().unwrap().is_empty());
}
