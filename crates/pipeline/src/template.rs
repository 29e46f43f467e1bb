//! Workflow templates and parameter binding.
//!
//! Two API-format ComfyUI graphs ship with the worker: plain
//! image-to-video and first-last-frame. Binding pulls every node the
//! job writes to out of the graph into a typed set of slots, fails if a
//! required one is missing, writes the job parameters, and puts the
//! nodes back. A graph is never submitted half-bound.

use std::path::Path;

use serde_json::{Map, Value};
use vidgen_core::error::CoreError;
use vidgen_core::request::{JobRequest, LoraPair, MAX_LORA_PAIRS};
use vidgen_core::resolution::normalize_dimension;

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const SINGLE_IMAGE_TEMPLATE: &str = include_str!("../templates/wan22_i2v_api.json");
const FIRST_LAST_FRAME_TEMPLATE: &str = include_str!("../templates/wan22_flf2v_api.json");

/// Which graph a job runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVariant {
    SingleImage,
    FirstLastFrame,
}

impl TemplateVariant {
    /// First-last-frame iff a terminal image was supplied.
    pub fn for_end_image(has_end_image: bool) -> Self {
        if has_end_image {
            Self::FirstLastFrame
        } else {
            Self::SingleImage
        }
    }

    /// File name looked up in an override directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::SingleImage => "wan22_i2v_api.json",
            Self::FirstLastFrame => "wan22_flf2v_api.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleImage => "single_image",
            Self::FirstLastFrame => "first_last_frame",
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            Self::SingleImage => SINGLE_IMAGE_TEMPLATE,
            Self::FirstLastFrame => FIRST_LAST_FRAME_TEMPLATE,
        }
    }
}

// ---------------------------------------------------------------------------
// Node slots
// ---------------------------------------------------------------------------

/// A node the binder writes to, keyed by its stable id in the shipped
/// templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSlot {
    StartImage,
    FrameCount,
    Prompt,
    NoiseSeed,
    Sampler,
    Width,
    Height,
    ContextOptions,
    HighLora,
    LowLora,
    Steps,
    LowStepSplit,
    EndImage,
}

impl NodeSlot {
    pub const fn node_id(self) -> &'static str {
        match self {
            Self::StartImage => "244",
            Self::FrameCount => "541",
            Self::Prompt => "135",
            Self::NoiseSeed => "220",
            Self::Sampler => "540",
            Self::Width => "235",
            Self::Height => "236",
            Self::ContextOptions => "498",
            Self::HighLora => "279",
            Self::LowLora => "553",
            Self::Steps => "834",
            Self::LowStepSplit => "829",
            Self::EndImage => "617",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StartImage => "start image",
            Self::FrameCount => "frame count",
            Self::Prompt => "text prompt",
            Self::NoiseSeed => "noise seed",
            Self::Sampler => "sampler",
            Self::Width => "width",
            Self::Height => "height",
            Self::ContextOptions => "context options",
            Self::HighLora => "high LoRA",
            Self::LowLora => "low LoRA",
            Self::Steps => "steps",
            Self::LowStepSplit => "low-step split",
            Self::EndImage => "end image",
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Workflow template {variant} is missing required node {node_id} ({slot})")]
    MissingNode {
        variant: &'static str,
        slot: &'static str,
        node_id: &'static str,
    },

    #[error("Workflow node {node_id} ({slot}) has no inputs object")]
    MalformedNode {
        slot: &'static str,
        node_id: &'static str,
    },

    #[error("Failed to read workflow template {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow template {name} is not a JSON object: {reason}")]
    Parse { name: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Bind parameters
// ---------------------------------------------------------------------------

/// Everything written into the graph, already normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct BindParams {
    pub start_image: String,
    pub end_image: Option<String>,
    pub length: u32,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub seed: i64,
    pub cfg: f64,
    pub width: u32,
    pub height: u32,
    pub context_overlap: u32,
    pub steps: u32,
    pub low_steps: u32,
    pub lora_pairs: Vec<LoraPair>,
}

impl BindParams {
    /// Collect parameters from a parsed job and its resolved images.
    ///
    /// Fails when width or height is not numeric.
    pub fn from_job(
        job: &JobRequest,
        start_image: &Path,
        end_image: Option<&Path>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            start_image: start_image.to_string_lossy().into_owned(),
            end_image: end_image.map(|p| p.to_string_lossy().into_owned()),
            length: job.length,
            positive_prompt: job.prompt.clone(),
            negative_prompt: job.effective_negative_prompt().to_string(),
            seed: job.seed,
            cfg: job.cfg,
            width: normalize_dimension(&job.width)?,
            height: normalize_dimension(&job.height)?,
            context_overlap: job.context_overlap,
            steps: job.steps,
            low_steps: job.low_steps(),
            lora_pairs: job.lora_pairs.iter().take(MAX_LORA_PAIRS).cloned().collect(),
        })
    }

    pub fn variant(&self) -> TemplateVariant {
        TemplateVariant::for_end_image(self.end_image.is_some())
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A freshly parsed, unbound graph.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    variant: TemplateVariant,
    nodes: Map<String, Value>,
}

/// A graph with every job parameter written, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundGraph {
    pub variant: TemplateVariant,
    pub graph: Value,
}

impl BoundGraph {
    /// Read back one input of one node.
    pub fn input(&self, node_id: &str, name: &str) -> Option<&Value> {
        self.graph.get(node_id)?.get("inputs")?.get(name)
    }
}

impl WorkflowTemplate {
    /// Parse the embedded copy of `variant`.
    pub fn embedded(variant: TemplateVariant) -> Result<Self, TemplateError> {
        Self::parse(variant, variant.embedded())
    }

    /// Load `variant`, preferring a file of the same name in
    /// `workflow_dir` when one exists.
    pub async fn load(
        variant: TemplateVariant,
        workflow_dir: Option<&Path>,
    ) -> Result<Self, TemplateError> {
        let Some(dir) = workflow_dir else {
            return Self::embedded(variant);
        };

        let path = dir.join(variant.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "Using workflow template override");
                Self::parse(variant, &text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No template override, using embedded copy");
                Self::embedded(variant)
            }
            Err(source) => Err(TemplateError::Read { path, source }),
        }
    }

    pub fn parse(variant: TemplateVariant, text: &str) -> Result<Self, TemplateError> {
        let parse_err = |reason: String| TemplateError::Parse {
            name: variant.file_name(),
            reason,
        };
        match serde_json::from_str::<Value>(text).map_err(|e| parse_err(e.to_string()))? {
            Value::Object(nodes) => Ok(Self { variant, nodes }),
            _ => Err(parse_err("top level is not an object".into())),
        }
    }

    pub fn variant(&self) -> TemplateVariant {
        self.variant
    }

    /// Whether the graph contains a node with `node_id`.
    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Write `params` into the graph.
    pub fn bind(self, params: &BindParams) -> Result<BoundGraph, TemplateError> {
        let variant = self.variant;
        let mut graph = self.nodes;
        let mut slots = SlotNodes::extract(&mut graph, variant, params.end_image.is_some())?;

        slots.start_image.set("image", params.start_image.as_str());
        slots.frame_count.set("num_frames", params.length);
        slots.prompt.set("positive_prompt", params.positive_prompt.as_str());
        slots.prompt.set("negative_prompt", params.negative_prompt.as_str());
        slots.noise_seed.set("seed", params.seed);
        slots.sampler.set("seed", params.seed);
        slots.sampler.set("cfg", params.cfg);
        slots.width.set("value", params.width);
        slots.height.set("value", params.height);
        slots.context.set("context_overlap", params.context_overlap);

        if let Some((steps, split)) = slots.steps.as_mut() {
            steps.set("steps", params.steps);
            split.set("step", params.low_steps);
        }

        if let (Some(node), Some(path)) = (slots.end_image.as_mut(), params.end_image.as_deref()) {
            node.set("image", path);
        }

        for (i, pair) in params.lora_pairs.iter().take(MAX_LORA_PAIRS).enumerate() {
            let index = i + 1;
            if let Some((name, weight)) = pair.high_adapter() {
                slots.high_lora.set(&format!("lora_{index}"), name);
                slots.high_lora.set(&format!("strength_{index}"), weight);
            }
            if let Some((name, weight)) = pair.low_adapter() {
                slots.low_lora.set(&format!("lora_{index}"), name);
                slots.low_lora.set(&format!("strength_{index}"), weight);
            }
        }

        slots.restore(&mut graph);

        tracing::info!(
            variant = variant.as_str(),
            width = params.width,
            height = params.height,
            frames = params.length,
            loras = params.lora_pairs.len(),
            "Bound workflow template",
        );

        Ok(BoundGraph {
            variant,
            graph: Value::Object(graph),
        })
    }
}

// ---------------------------------------------------------------------------
// Typed slot arena
// ---------------------------------------------------------------------------

/// One node lifted out of the graph while it is being written.
struct GraphNode {
    slot: NodeSlot,
    node: Map<String, Value>,
    inputs: Map<String, Value>,
}

impl GraphNode {
    fn set(&mut self, input: &str, value: impl Into<Value>) {
        self.inputs.insert(input.to_string(), value.into());
    }

    fn put_back(mut self, graph: &mut Map<String, Value>) {
        self.node.insert("inputs".into(), Value::Object(self.inputs));
        graph.insert(self.slot.node_id().into(), Value::Object(self.node));
    }
}

fn take_optional(
    graph: &mut Map<String, Value>,
    slot: NodeSlot,
) -> Result<Option<GraphNode>, TemplateError> {
    let Some(value) = graph.remove(slot.node_id()) else {
        return Ok(None);
    };
    let malformed = || TemplateError::MalformedNode {
        slot: slot.name(),
        node_id: slot.node_id(),
    };
    let Value::Object(mut node) = value else {
        return Err(malformed());
    };
    let Some(Value::Object(inputs)) = node.remove("inputs") else {
        return Err(malformed());
    };
    Ok(Some(GraphNode { slot, node, inputs }))
}

fn take_required(
    graph: &mut Map<String, Value>,
    slot: NodeSlot,
    variant: TemplateVariant,
) -> Result<GraphNode, TemplateError> {
    take_optional(graph, slot)?.ok_or(TemplateError::MissingNode {
        variant: variant.as_str(),
        slot: slot.name(),
        node_id: slot.node_id(),
    })
}

struct SlotNodes {
    start_image: GraphNode,
    frame_count: GraphNode,
    prompt: GraphNode,
    noise_seed: GraphNode,
    sampler: GraphNode,
    width: GraphNode,
    height: GraphNode,
    context: GraphNode,
    high_lora: GraphNode,
    low_lora: GraphNode,
    /// Step count node and its companion split node.
    steps: Option<(GraphNode, GraphNode)>,
    end_image: Option<GraphNode>,
}

impl SlotNodes {
    fn extract(
        graph: &mut Map<String, Value>,
        variant: TemplateVariant,
        needs_end_image: bool,
    ) -> Result<Self, TemplateError> {
        let mut required = |slot| take_required(graph, slot, variant);
        let start_image = required(NodeSlot::StartImage)?;
        let frame_count = required(NodeSlot::FrameCount)?;
        let prompt = required(NodeSlot::Prompt)?;
        let noise_seed = required(NodeSlot::NoiseSeed)?;
        let sampler = required(NodeSlot::Sampler)?;
        let width = required(NodeSlot::Width)?;
        let height = required(NodeSlot::Height)?;
        let context = required(NodeSlot::ContextOptions)?;
        let high_lora = required(NodeSlot::HighLora)?;
        let low_lora = required(NodeSlot::LowLora)?;

        let steps = match take_optional(graph, NodeSlot::Steps)? {
            Some(steps) => Some((steps, take_required(graph, NodeSlot::LowStepSplit, variant)?)),
            None => None,
        };

        let end_image = if needs_end_image {
            Some(take_required(graph, NodeSlot::EndImage, variant)?)
        } else {
            None
        };

        Ok(Self {
            start_image,
            frame_count,
            prompt,
            noise_seed,
            sampler,
            width,
            height,
            context,
            high_lora,
            low_lora,
            steps,
            end_image,
        })
    }

    fn restore(self, graph: &mut Map<String, Value>) {
        for node in [
            self.start_image,
            self.frame_count,
            self.prompt,
            self.noise_seed,
            self.sampler,
            self.width,
            self.height,
            self.context,
            self.high_lora,
            self.low_lora,
        ] {
            node.put_back(graph);
        }
        if let Some((steps, split)) = self.steps {
            steps.put_back(graph);
            split.put_back(graph);
        }
        if let Some(end_image) = self.end_image {
            end_image.put_back(graph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn job(input: Value) -> JobRequest {
        JobRequest::from_input(&input).unwrap()
    }

    fn params(input: Value, end_image: Option<&str>) -> BindParams {
        BindParams::from_job(
            &job(input),
            Path::new("/work/input_image.jpg"),
            end_image.map(Path::new),
        )
        .unwrap()
    }

    fn bind(params: &BindParams) -> BoundGraph {
        WorkflowTemplate::embedded(params.variant())
            .unwrap()
            .bind(params)
            .unwrap()
    }

    #[test]
    fn embedded_templates_parse_with_expected_nodes() {
        let single = WorkflowTemplate::embedded(TemplateVariant::SingleImage).unwrap();
        let flf = WorkflowTemplate::embedded(TemplateVariant::FirstLastFrame).unwrap();
        assert!(!single.has_node(NodeSlot::EndImage.node_id()));
        assert!(flf.has_node(NodeSlot::EndImage.node_id()));
        assert!(single.has_node(NodeSlot::Steps.node_id()));
    }

    #[test]
    fn binds_all_job_parameters() {
        let p = params(
            json!({
                "prompt": "a cat surfing",
                "length": 49,
                "steps": 8,
                "seed": 7,
                "cfg": 3.5,
                "width": 500,
                "height": "800",
                "context_overlap": 24,
            }),
            None,
        );
        let bound = bind(&p);

        assert_eq!(bound.variant, TemplateVariant::SingleImage);
        assert_eq!(bound.input("244", "image"), Some(&json!("/work/input_image.jpg")));
        assert_eq!(bound.input("541", "num_frames"), Some(&json!(49)));
        assert_eq!(bound.input("135", "positive_prompt"), Some(&json!("a cat surfing")));
        assert_eq!(bound.input("220", "seed"), Some(&json!(7)));
        assert_eq!(bound.input("540", "seed"), Some(&json!(7)));
        assert_eq!(bound.input("540", "cfg"), Some(&json!(3.5)));
        assert_eq!(bound.input("235", "value"), Some(&json!(496)));
        assert_eq!(bound.input("236", "value"), Some(&json!(800)));
        assert_eq!(bound.input("498", "context_overlap"), Some(&json!(24)));
        assert_eq!(bound.input("834", "steps"), Some(&json!(8)));
        assert_eq!(bound.input("829", "step"), Some(&json!(4)));
        assert_eq!(
            bound.input("135", "negative_prompt"),
            Some(&json!(vidgen_core::request::DEFAULT_NEGATIVE_PROMPT))
        );
        // Untouched wiring survives the round trip through the slots.
        assert_eq!(bound.input("220", "model"), Some(&json!(["122", 0])));
        assert_eq!(bound.graph["244"]["class_type"], json!("LoadImage"));
    }

    #[test]
    fn small_dimensions_hit_the_floor() {
        let bound = bind(&params(json!({"prompt": "x", "width": 8, "height": 24}), None));
        assert_eq!(bound.input("235", "value"), Some(&json!(16)));
        assert_eq!(bound.input("236", "value"), Some(&json!(32)));
    }

    #[test]
    fn non_numeric_dimension_is_rejected() {
        let result = BindParams::from_job(
            &job(json!({"prompt": "x", "width": "wide"})),
            Path::new("/a.png"),
            None,
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn end_image_selects_first_last_frame() {
        let p = params(json!({"prompt": "x"}), Some("/work/end_image.jpg"));
        let bound = bind(&p);
        assert_eq!(bound.variant, TemplateVariant::FirstLastFrame);
        assert_eq!(bound.input("617", "image"), Some(&json!("/work/end_image.jpg")));
    }

    #[test]
    fn only_first_four_lora_pairs_apply() {
        let pairs: Vec<Value> = (1..=6)
            .map(|i| json!({"high": format!("high_{i}.safetensors"), "low": format!("low_{i}.safetensors"), "high_weight": 0.5}))
            .collect();
        let bound = bind(&params(json!({"prompt": "x", "lora_pairs": pairs}), None));

        for i in 1..=4 {
            assert_eq!(
                bound.input("279", &format!("lora_{i}")),
                Some(&json!(format!("high_{i}.safetensors")))
            );
            assert_eq!(bound.input("279", &format!("strength_{i}")), Some(&json!(0.5)));
            assert_eq!(
                bound.input("553", &format!("lora_{i}")),
                Some(&json!(format!("low_{i}.safetensors")))
            );
            assert_eq!(bound.input("553", &format!("strength_{i}")), Some(&json!(1.0)));
        }
        assert_eq!(bound.input("279", "lora_5"), None);
    }

    #[test]
    fn high_and_low_adapters_apply_independently() {
        let bound = bind(&params(
            json!({"prompt": "x", "lora_pairs": [{"low": "only_low.safetensors", "low_weight": 0.8}]}),
            None,
        ));
        assert_eq!(bound.input("279", "lora_1"), Some(&json!("none")));
        assert_eq!(bound.input("553", "lora_1"), Some(&json!("only_low.safetensors")));
        assert_eq!(bound.input("553", "strength_1"), Some(&json!(0.8)));
    }

    #[test]
    fn negative_seed_reaches_both_seed_nodes() {
        let bound = bind(&params(json!({"prompt": "x", "seed": -3}), None));
        assert_eq!(bound.input("220", "seed"), Some(&json!(-3)));
        assert_eq!(bound.input("540", "seed"), Some(&json!(-3)));
    }

    #[test]
    fn binding_is_idempotent() {
        let p = params(json!({"prompt": "same", "seed": 99}), Some("/e.jpg"));
        assert_eq!(bind(&p), bind(&p));
    }

    #[test]
    fn missing_required_node_fails() {
        let mut template = WorkflowTemplate::embedded(TemplateVariant::SingleImage).unwrap();
        template.nodes.remove("540");
        let err = template.bind(&params(json!({"prompt": "x"}), None)).unwrap_err();
        assert_matches!(err, TemplateError::MissingNode { node_id: "540", .. });
    }

    #[test]
    fn steps_node_is_optional_but_needs_its_companion() {
        let mut without_steps = WorkflowTemplate::embedded(TemplateVariant::SingleImage).unwrap();
        without_steps.nodes.remove("834");
        without_steps.nodes.remove("829");
        let bound = without_steps
            .bind(&params(json!({"prompt": "x"}), None))
            .unwrap();
        assert_eq!(bound.input("834", "steps"), None);

        let mut orphan = WorkflowTemplate::embedded(TemplateVariant::SingleImage).unwrap();
        orphan.nodes.remove("829");
        let err = orphan.bind(&params(json!({"prompt": "x"}), None)).unwrap_err();
        assert_matches!(err, TemplateError::MissingNode { node_id: "829", .. });
    }

    #[test]
    fn end_image_without_terminal_node_fails() {
        let template = WorkflowTemplate::embedded(TemplateVariant::SingleImage).unwrap();
        let err = template
            .bind(&params(json!({"prompt": "x"}), Some("/e.jpg")))
            .unwrap_err();
        assert_matches!(err, TemplateError::MissingNode { node_id: "617", .. });
    }

    #[test]
    fn node_without_inputs_is_malformed() {
        let template = WorkflowTemplate::parse(
            TemplateVariant::SingleImage,
            r#"{"244": {"class_type": "LoadImage"}}"#,
        )
        .unwrap();
        let err = template.bind(&params(json!({"prompt": "x"}), None)).unwrap_err();
        assert_matches!(err, TemplateError::MalformedNode { node_id: "244", .. });
    }

    #[test]
    fn non_object_template_is_rejected() {
        assert_matches!(
            WorkflowTemplate::parse(TemplateVariant::SingleImage, "[1, 2]"),
            Err(TemplateError::Parse { .. })
        );
    }

    #[tokio::test]
    async fn override_directory_wins_and_falls_back_per_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("wan22_i2v_api.json"),
            r#"{"244": {"class_type": "LoadImage", "inputs": {}}}"#,
        )
        .unwrap();

        let single = WorkflowTemplate::load(TemplateVariant::SingleImage, Some(dir.path()))
            .await
            .unwrap();
        assert!(!single.has_node("540"));

        let flf = WorkflowTemplate::load(TemplateVariant::FirstLastFrame, Some(dir.path()))
            .await
            .unwrap();
        assert!(flf.has_node("617"));
    }
}
