// src/manifest.rs
//
// Turns prefetch responses into asset lists.
//
// Webview responses group assets by cache directory:
// `{"cache_assets": {"html": [{"name": "t.html", "value": "https://..."}]}}`.
// Video responses list videos only: `{"videos": [{"name": ..., "value": ...}]}`.
// Entries may carry a `sha256` checksum.

use log::warn;
use serde_json::Value;

use crate::models::AssetDescriptor;
use crate::prefetcher::PrefetchMode;

/// Cache directory video assets are stored under.
pub const VIDEOS_DIR: &str = "videos";

/// Assets found in a response, plus the number of entries that were unusable.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub assets: Vec<AssetDescriptor>,
    pub skipped: usize,
}

/// Parses what it can. Malformed entries are counted in `skipped` and left out.
pub fn parse(mode: PrefetchMode, body: &Value) -> Manifest {
    let mut manifest = Manifest::default();
    match mode {
        PrefetchMode::WebView => match body.get("cache_assets").and_then(Value::as_object) {
            Some(groups) => {
                for (media_type, entries) in groups {
                    if !is_safe_name(media_type) {
                        manifest.skipped += entries.as_array().map_or(1, Vec::len);
                        continue;
                    }
                    collect(media_type, entries, &mut manifest);
                }
            }
            None => warn!("webview prefetch response has no cache_assets"),
        },
        PrefetchMode::Video => match body.get("videos") {
            Some(entries) => collect(VIDEOS_DIR, entries, &mut manifest),
            None => warn!("video prefetch response has no videos"),
        },
    }
    if manifest.skipped > 0 {
        warn!("skipped {} malformed manifest entries", manifest.skipped);
    }
    manifest
}

fn collect(media_type: &str, entries: &Value, manifest: &mut Manifest) {
    let Some(entries) = entries.as_array() else {
        manifest.skipped += 1;
        return;
    };
    for entry in entries {
        match descriptor(media_type, entry) {
            Some(asset) => manifest.assets.push(asset),
            None => manifest.skipped += 1,
        }
    }
}

fn descriptor(media_type: &str, entry: &Value) -> Option<AssetDescriptor> {
    let name = entry.get("name")?.as_str()?;
    let url = entry.get("value")?.as_str()?;
    if !is_safe_name(name) || url.is_empty() {
        return None;
    }
    let mut asset = AssetDescriptor::new(media_type, name, url);
    asset.sha256 = entry.get("sha256").and_then(Value::as_str).map(str::to_string);
    Some(asset)
}

/// A single path component that cannot escape the cache directory.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(|c: char| c == '/' || c == '\\')
}
