//! Job request model.
//!
//! A job arrives from the dispatch runtime as a single JSON object.
//! [`JobRequest::from_input`] deserializes and validates it; the
//! accessors below apply the precedence and defaulting rules so the
//! rest of the pipeline never looks at raw fields.

use serde::Deserialize;
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default number of frames to generate.
pub const DEFAULT_LENGTH: u32 = 81;

/// Default sampler step count.
pub const DEFAULT_STEPS: u32 = 10;

/// Default noise seed.
pub const DEFAULT_SEED: i64 = 42;

/// Default classifier-free guidance scale.
pub const DEFAULT_CFG: f64 = 2.0;

/// Default output width in pixels (before rounding).
pub const DEFAULT_WIDTH: u32 = 480;

/// Default output height in pixels (before rounding).
pub const DEFAULT_HEIGHT: u32 = 832;

/// Default temporal context overlap, in frames.
pub const DEFAULT_CONTEXT_OVERLAP: u32 = 48;

/// Default strength for a LoRA adapter when no weight is given.
pub const DEFAULT_LORA_WEIGHT: f64 = 1.0;

/// Maximum number of LoRA pairs the graph has slots for.
pub const MAX_LORA_PAIRS: usize = 4;

/// Negative prompt used when the job does not supply one.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "bright tones, overexposed, static, blurred details, \
subtitles, style, works, paintings, images, static, overall gray, worst quality, low quality, \
JPEG compression residue, ugly, incomplete, extra fingers, poorly drawn hands, poorly drawn \
faces, deformed, disfigured, misshapen limbs, fused fingers, still picture, messy background, \
three legs, many people in the background, walking backwards";

/// Prompt of the warm-up job the dispatch runtime sends on deploy.
pub const WARMUP_PROMPT: &str = "test";

/// Image path of the warm-up job the dispatch runtime sends on deploy.
pub const WARMUP_IMAGE_PATH: &str = "/example_image.png";

fn default_length() -> u32 {
    DEFAULT_LENGTH
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_seed() -> i64 {
    DEFAULT_SEED
}

fn default_cfg() -> f64 {
    DEFAULT_CFG
}

fn default_width() -> serde_json::Value {
    DEFAULT_WIDTH.into()
}

fn default_height() -> serde_json::Value {
    DEFAULT_HEIGHT.into()
}

fn default_context_overlap() -> u32 {
    DEFAULT_CONTEXT_OVERLAP
}

fn default_lora_weight() -> f64 {
    DEFAULT_LORA_WEIGHT
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Where an input image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A path already present on the worker's filesystem.
    Path(String),
    /// A remote URL to download.
    Url(String),
    /// Inline base64 data (optionally a `data:` URI).
    Base64(String),
}

impl ImageSource {
    /// Pick the first populated source in `path`, `url`, `base64` order.
    ///
    /// A "path" that is really an `http(s)://` URL is reclassified as
    /// [`ImageSource::Url`]; callers routinely put URLs in the path field.
    pub fn select(
        path: Option<&str>,
        url: Option<&str>,
        base64: Option<&str>,
    ) -> Option<Self> {
        fn populated(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|s| !s.is_empty())
        }

        if let Some(path) = populated(path) {
            if looks_like_url(path) {
                return Some(Self::Url(path.to_string()));
            }
            return Some(Self::Path(path.to_string()));
        }
        if let Some(url) = populated(url) {
            return Some(Self::Url(url.to_string()));
        }
        populated(base64).map(|b| Self::Base64(b.to_string()))
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Path(_) => "path",
            Self::Url(_) => "url",
            Self::Base64(_) => "base64",
        }
    }
}

fn looks_like_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A high/low LoRA adapter pair.
///
/// Either half may be absent; the two are applied independently.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoraPair {
    #[serde(default)]
    pub high: Option<String>,
    #[serde(default)]
    pub low: Option<String>,
    #[serde(default = "default_lora_weight")]
    pub high_weight: f64,
    #[serde(default = "default_lora_weight")]
    pub low_weight: f64,
}

impl LoraPair {
    /// The high-noise adapter name and weight, if set.
    pub fn high_adapter(&self) -> Option<(&str, f64)> {
        non_empty(self.high.as_deref()).map(|name| (name, self.high_weight))
    }

    /// The low-noise adapter name and weight, if set.
    pub fn low_adapter(&self) -> Option<(&str, f64)> {
        non_empty(self.low.as_deref()).map(|name| (name, self.low_weight))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// A single video generation job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,

    /// Number of frames.
    #[validate(range(min = 1))]
    #[serde(default = "default_length")]
    pub length: u32,

    #[validate(range(min = 1))]
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Passed to the graph as given; negative values are legal.
    #[serde(default = "default_seed")]
    pub seed: i64,

    #[serde(default = "default_cfg")]
    pub cfg: f64,

    /// Raw width; rounded by [`crate::resolution::normalize_dimension`].
    #[serde(default = "default_width")]
    pub width: serde_json::Value,

    /// Raw height; rounded by [`crate::resolution::normalize_dimension`].
    #[serde(default = "default_height")]
    pub height: serde_json::Value,

    #[serde(default = "default_context_overlap")]
    pub context_overlap: u32,

    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,

    #[serde(default)]
    pub end_image_path: Option<String>,
    #[serde(default)]
    pub end_image_url: Option<String>,
    #[serde(default)]
    pub end_image_base64: Option<String>,

    #[serde(default)]
    pub lora_pairs: Vec<LoraPair>,
}

impl JobRequest {
    /// Deserialize and validate a raw job input object.
    pub fn from_input(input: &serde_json::Value) -> Result<Self, CoreError> {
        let request: Self = serde_json::from_value(input.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid job input: {e}")))?;
        request
            .validate()
            .map_err(|e| CoreError::Validation(format!("Invalid job input: {e}")))?;
        Ok(request)
    }

    /// The primary image source, if any.
    pub fn image_source(&self) -> Option<ImageSource> {
        ImageSource::select(
            self.image_path.as_deref(),
            self.image_url.as_deref(),
            self.image_base64.as_deref(),
        )
    }

    /// The terminal-frame image source, if any.
    pub fn end_image_source(&self) -> Option<ImageSource> {
        ImageSource::select(
            self.end_image_path.as_deref(),
            self.end_image_url.as_deref(),
            self.end_image_base64.as_deref(),
        )
    }

    /// Negative prompt, falling back to [`DEFAULT_NEGATIVE_PROMPT`].
    pub fn effective_negative_prompt(&self) -> &str {
        self.negative_prompt
            .as_deref()
            .unwrap_or(DEFAULT_NEGATIVE_PROMPT)
    }

    /// Drop LoRA pairs beyond [`MAX_LORA_PAIRS`].
    ///
    /// Returns how many pairs were discarded so the caller can log it.
    pub fn truncate_lora_pairs(&mut self) -> usize {
        let dropped = self.lora_pairs.len().saturating_sub(MAX_LORA_PAIRS);
        self.lora_pairs.truncate(MAX_LORA_PAIRS);
        dropped
    }

    /// Low-noise step split: 60% of the total steps, rounded down.
    pub fn low_steps(&self) -> u32 {
        (u64::from(self.steps) * 3 / 5) as u32
    }
}

/// Whether a raw job input is the deploy-time warm-up job.
///
/// Checked before any parsing so the warm-up never touches the network.
pub fn is_warmup_job(input: &serde_json::Value) -> bool {
    input.get("prompt").and_then(|v| v.as_str()) == Some(WARMUP_PROMPT)
        && input.get("image_path").and_then(|v| v.as_str()) == Some(WARMUP_IMAGE_PATH)
}
