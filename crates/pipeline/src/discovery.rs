//! Filesystem fallback for finding a freshly written video.
//!
//! Used when the engine's history does not point at a usable file. The
//! output directory and its immediate subdirectories are scanned for
//! recent video files; engine-named files are preferred, then newer
//! ones.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use vidgen_core::naming::is_video_file;

/// File names the video combiner node produces by default.
static ENGINE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^WanVideo").expect("valid regex"));

/// A video file found by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCandidate {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
    /// 0 for engine-named files, 1 for everything else.
    pub priority: u8,
}

/// Scan `output_dir` (and one level below it) for videos modified no
/// earlier than `window` before `now`, best candidate first.
pub async fn scan_recent_videos(
    output_dir: &Path,
    window: Duration,
    now: SystemTime,
) -> Vec<VideoCandidate> {
    let mut candidates = Vec::new();
    let mut subdirs = Vec::new();

    collect_dir(output_dir, window, now, &mut candidates, Some(&mut subdirs)).await;
    for dir in &subdirs {
        collect_dir(dir, window, now, &mut candidates, None).await;
    }

    candidates.sort_by_key(|c| (c.priority, Reverse(c.modified)));
    tracing::debug!(
        dir = %output_dir.display(),
        found = candidates.len(),
        "Scanned output directory for recent videos",
    );
    candidates
}

/// Best candidate of a scan, if any.
pub async fn find_recent_video(
    output_dir: &Path,
    window: Duration,
    now: SystemTime,
) -> Option<VideoCandidate> {
    scan_recent_videos(output_dir, window, now)
        .await
        .into_iter()
        .next()
}

async fn collect_dir(
    dir: &Path,
    window: Duration,
    now: SystemTime,
    out: &mut Vec<VideoCandidate>,
    mut subdirs: Option<&mut Vec<PathBuf>>,
) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Cannot read output directory");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Error listing output directory");
                break;
            }
        };
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let path = entry.path();

        if metadata.is_dir() {
            if let Some(subdirs) = subdirs.as_deref_mut() {
                subdirs.push(path);
            }
            continue;
        }
        if !metadata.is_file() || !is_video_file(&path) {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('_') {
            continue;
        }

        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > window {
            continue;
        }

        out.push(VideoCandidate {
            path,
            modified,
            size: metadata.len(),
            priority: if ENGINE_NAME_RE.is_match(&name) { 0 } else { 1 },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    fn touch(path: &Path, age_secs: u64, now: SystemTime) {
        let file = std::fs::File::create(path).unwrap();
        std::io::Write::write_all(&mut &file, b"video").unwrap();
        file.set_modified(now - Duration::from_secs(age_secs)).unwrap();
    }

    #[tokio::test]
    async fn engine_named_recent_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(&dir.path().join("WanVideo_X264_test.mp4"), 10, now);
        touch(&dir.path().join("unrelated.mp4"), 400, now);

        let best = find_recent_video(dir.path(), WINDOW, now).await.unwrap();
        assert_eq!(best.path, dir.path().join("WanVideo_X264_test.mp4"));
        assert_eq!(best.priority, 0);
        assert_eq!(best.size, 5);
    }

    #[tokio::test]
    async fn engine_name_beats_newer_generic_file() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(&dir.path().join("clip.mov"), 5, now);
        touch(&dir.path().join("WanVideo_00001.mp4"), 60, now);

        let ranked = scan_recent_videos(dir.path(), WINDOW, now).await;
        let names: Vec<_> = ranked
            .iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["WanVideo_00001.mp4", "clip.mov"]);
    }

    #[tokio::test]
    async fn newest_first_within_priority() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(&dir.path().join("a.mp4"), 100, now);
        touch(&dir.path().join("b.mkv"), 20, now);

        let best = find_recent_video(dir.path(), WINDOW, now).await.unwrap();
        assert_eq!(best.path, dir.path().join("b.mkv"));
    }

    #[tokio::test]
    async fn scans_one_level_of_subdirectories_only() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let sub = dir.path().join("wan");
        let deep = sub.join("deeper");
        std::fs::create_dir_all(&deep).unwrap();
        touch(&sub.join("nested.mp4"), 10, now);
        touch(&deep.join("too_deep.mp4"), 1, now);

        let ranked = scan_recent_videos(dir.path(), WINDOW, now).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].path, sub.join("nested.mp4"));
    }

    #[tokio::test]
    async fn skips_underscored_non_video_and_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(&dir.path().join("_WanVideo_temp.mp4"), 1, now);
        touch(&dir.path().join("WanVideo_preview.png"), 1, now);
        touch(&dir.path().join("WanVideo_old.mp4"), 301, now);

        assert!(find_recent_video(dir.path(), WINDOW, now).await.is_none());
    }

    #[tokio::test]
    async fn missing_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(find_recent_video(&missing, WINDOW, SystemTime::now())
            .await
            .is_none());
    }
}
