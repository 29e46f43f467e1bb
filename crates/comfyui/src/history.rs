//! Output references extracted from `GET /history/{prompt_id}`.
//!
//! The history record maps each output-producing node to whatever it
//! wrote. Video combiner nodes report a collection under `gifs` (older
//! builds) or `videos`; a few nodes report a single object under
//! `video` or `gif` instead.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

/// Keys whose value is an array of file references.
pub const COLLECTION_KEYS: &[&str] = &["gifs", "videos"];

/// Keys whose value is a single file reference.
pub const SINGLE_KEYS: &[&str] = &["video", "gif"];

/// One file reported by an output node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputRef {
    /// Node that produced the file. Filled in during extraction.
    #[serde(skip)]
    pub node_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
    /// `output`, `temp`, or `input`.
    #[serde(default, rename = "type")]
    pub folder_type: Option<String>,
    /// Absolute path on the engine host, when the node reports one.
    #[serde(default)]
    pub fullpath: Option<String>,
}

impl OutputRef {
    /// Local path of the referenced file.
    ///
    /// `fullpath` wins; otherwise `filename` (under `subfolder`) is
    /// joined onto `output_dir`. `None` when neither is present.
    pub fn resolve(&self, output_dir: &Path) -> Option<PathBuf> {
        if let Some(full) = self.fullpath.as_deref().filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(full));
        }
        let filename = self.filename.as_deref().filter(|f| !f.is_empty())?;
        let mut path = output_dir.to_path_buf();
        if let Some(sub) = self.subfolder.as_deref().filter(|s| !s.is_empty()) {
            path.push(sub);
        }
        path.push(filename);
        Some(path)
    }
}

/// Collect the video references recorded for `prompt_id`.
///
/// Returns `None` when the history has no entry for the prompt yet,
/// and `Some` (possibly empty) once it does. Within a node, collection
/// keys are listed before single keys; nodes are visited in ascending
/// id order so the first reference is stable.
pub fn video_outputs(history: &Value, prompt_id: &str) -> Option<Vec<OutputRef>> {
    let entry = history.get(prompt_id)?;
    let Some(outputs) = entry.get("outputs").and_then(Value::as_object) else {
        return Some(Vec::new());
    };

    let mut node_ids: Vec<&String> = outputs.keys().collect();
    node_ids.sort_by(|a, b| compare_node_ids(a, b));

    let mut refs = Vec::new();
    for node_id in node_ids {
        let node_output = &outputs[node_id.as_str()];

        for key in COLLECTION_KEYS {
            if let Some(items) = node_output.get(*key).and_then(Value::as_array) {
                tracing::debug!(node_id = %node_id, key, count = items.len(), "History video collection");
                refs.extend(items.iter().filter_map(|item| parse_ref(item, node_id)));
            }
        }
        for key in SINGLE_KEYS {
            if let Some(item) = node_output.get(*key).filter(|v| v.is_object()) {
                refs.extend(parse_ref(item, node_id));
            }
        }
    }
    Some(refs)
}

fn parse_ref(item: &Value, node_id: &str) -> Option<OutputRef> {
    match OutputRef::deserialize(item) {
        Ok(mut output) => {
            output.node_id = node_id.to_string();
            Some(output)
        }
        Err(e) => {
            tracing::debug!(node_id, error = %e, "Skipping malformed history output");
            None
        }
    }
}

/// Numeric ids sort numerically, anything else falls back to string order.
fn compare_node_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
