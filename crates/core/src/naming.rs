//! Naming rules for delivered videos.
//!
//! Generated files are named `{task_id}_{hex8}.mp4` and served from
//! `https://{cdn_host}/{folder}/{filename}`.

use std::path::Path;

/// File extensions recognised as video output.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

/// Length of the random hex suffix appended to delivered filenames.
const SUFFIX_LEN: usize = 8;

/// Build the delivered filename for a task.
///
/// ```
/// use vidgen_core::naming::video_filename;
///
/// let name = video_filename("task_abc");
/// assert!(name.starts_with("task_abc_"));
/// assert!(name.ends_with(".mp4"));
/// assert_eq!(name.len(), "task_abc_".len() + 8 + ".mp4".len());
/// ```
pub fn video_filename(task_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{task_id}_{}.mp4", &suffix[..SUFFIX_LEN])
}

/// Public CDN URL for an uploaded object.
///
/// ```
/// use vidgen_core::naming::public_url;
///
/// assert_eq!(
///     public_url("mesulo.b-cdn.net", "runpod", "task_1_abcd1234.mp4"),
///     "https://mesulo.b-cdn.net/runpod/task_1_abcd1234.mp4",
/// );
/// ```
pub fn public_url(cdn_host: &str, folder: &str, filename: &str) -> String {
    format!("https://{cdn_host}/{folder}/{filename}")
}

/// Whether `path` has one of the [`VIDEO_EXTENSIONS`] (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
