// src/cache.rs
//
// On-disk asset cache: locations, freshness markers and the eviction sweep.
//
// Assets live at `base_dir/<media_type>/<filename>`. A download in progress
// is written next to its destination with a `TMP_SUFFIX` and renamed into
// place on success, so any `.tmp` file found while nothing is downloading is
// left over from an interrupted transfer.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::SdkConfig;

/// Suffix of partially downloaded files.
pub const TMP_SUFFIX: &str = ".tmp";

/// Subdirectories of the cache root that do not hold assets.
const NON_ASSET_DIRS: &[&str] = &["requests", "track", "session", "videoCompletionEvents"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocations {
    pub base_dir: PathBuf,
    pub videos_dir: PathBuf,
}

/// The file cache the downloader writes into.
pub trait FileCache: Send + Sync {
    fn locations(&self) -> CacheLocations;

    /// Refreshes the freshness marker of a cached file.
    fn touch(&self, file: &Path);

    /// Total size of every file below `dir`, in bytes.
    fn folder_size(&self, dir: &Path) -> u64;

    fn remove(&self, file: &Path) -> std::io::Result<()>;
}

/// [`FileCache`] backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DiskCache {
    base_dir: PathBuf,
}

impl DiskCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl FileCache for DiskCache {
    fn locations(&self) -> CacheLocations {
        CacheLocations {
            videos_dir: self.base_dir.join("videos"),
            base_dir: self.base_dir.clone(),
        }
    }

    fn touch(&self, file: &Path) {
        let result = fs::File::options()
            .write(true)
            .open(file)
            .and_then(|f| f.set_modified(SystemTime::now()));
        if let Err(e) = result {
            warn!("failed to touch {}: {}", file.display(), e);
        }
    }

    fn folder_size(&self, dir: &Path) -> u64 {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    fn remove(&self, file: &Path) -> std::io::Result<()> {
        fs::remove_file(file)
    }
}

/// Path a download of `destination` is written to before it completes.
pub fn tmp_path(destination: &Path) -> PathBuf {
    let mut raw = OsString::from(destination.as_os_str());
    raw.push(TMP_SUFFIX);
    PathBuf::from(raw)
}

fn is_asset_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    !name.contains('.') && !NON_ASSET_DIRS.iter().any(|d| d.eq_ignore_ascii_case(&name))
}

/// Every regular file directly inside an asset directory of the cache.
fn asset_files(base_dir: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(base_dir)
        .max_depth(2)
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || is_asset_dir(e))
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                debug!("skipping unreadable cache entry: {}", err);
                None
            }
        })
        .filter(|e| e.depth() == 2 && e.file_type().is_file())
}

/// Cached filenames grouped by asset directory. Partial downloads are left out.
pub fn inventory(locations: &CacheLocations) -> BTreeMap<String, Vec<String>> {
    let mut listing: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in asset_files(&locations.base_dir) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TMP_SUFFIX) {
            continue;
        }
        let Some(dir) = entry.path().parent().and_then(Path::file_name) else {
            continue;
        };
        listing
            .entry(dir.to_string_lossy().into_owned())
            .or_default()
            .push(name);
    }
    for names in listing.values_mut() {
        names.sort();
    }
    listing
}

struct Candidate {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
    is_video: bool,
    invalidated: bool,
}

/// Deletes stale cache files and returns the paths removed.
///
/// A file goes if it is empty, a leftover partial download, older than the
/// configured TTL, inside an invalidated folder, or a video while the videos
/// directory is over budget. Files are visited oldest first so the oldest
/// videos go first. Deletion failures are logged and skipped.
///
/// Must only run while nothing is being downloaded.
pub(crate) fn trim(cache: &dyn FileCache, config: &SdkConfig, now: SystemTime) -> Vec<PathBuf> {
    let locations = cache.locations();
    let mut candidates: Vec<Candidate> = asset_files(&locations.base_dir)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            let parent = entry.path().parent()?;
            let folder = parent.file_name()?.to_string_lossy().into_owned();
            Some(Candidate {
                len: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_video: parent == locations.videos_dir,
                invalidated: config.invalidate_folders.iter().any(|f| *f == folder),
                path: entry.into_path(),
            })
        })
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by_key(|c| c.modified);

    let ttl = config.cache_ttl();
    let mut video_bytes = cache.folder_size(&locations.videos_dir);
    let mut deleted = Vec::new();

    for candidate in candidates {
        let too_old = now
            .duration_since(candidate.modified)
            .map(|age| age > ttl)
            .unwrap_or(false);
        let partial = candidate
            .path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(TMP_SUFFIX));
        let over_budget = candidate.is_video && video_bytes > config.cache_max_bytes;
        let empty = candidate.len == 0;

        if !(too_old || partial || over_budget || empty || candidate.invalidated) {
            continue;
        }
        match cache.remove(&candidate.path) {
            Ok(()) => {
                if candidate.is_video {
                    video_bytes = video_bytes.saturating_sub(candidate.len);
                }
                debug!("evicted {}", candidate.path.display());
                deleted.push(candidate.path);
            }
            Err(e) => warn!("unable to delete {}: {}", candidate.path.display(), e),
        }
    }
    if !deleted.is_empty() {
        info!("cache trim removed {} files", deleted.len());
    }
    deleted
}
