use vidgen_comfyui::api::ComfyUIApiError;
use vidgen_comfyui::monitor::MonitorError;
use vidgen_comfyui::readiness::ReadinessError;
use vidgen_core::error::CoreError;

use crate::delivery::DeliveryError;
use crate::input::InputError;
use crate::template::TemplateError;

/// Failure of a single job, classified by the stage that produced it.
///
/// [`PipelineError::kind`] is the `error_type` tag reported to the
/// caller; the display string is the `error` message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An input image could not be obtained.
    #[error("{0}")]
    Input(#[from] InputError),

    /// The request or the graph template is unusable.
    #[error("{0}")]
    Validation(String),

    /// The engine did not become reachable in time.
    #[error("{0}")]
    Connectivity(#[from] ReadinessError),

    /// The engine rejected the graph, the event stream broke, or no
    /// output was produced.
    #[error("{0}")]
    Engine(String),

    /// The artifact could not be uploaded.
    #[error("{0}")]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    /// Stable error category reported as `error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "InputError",
            Self::Validation(_) => "ValidationError",
            Self::Connectivity(_) => "ConnectivityError",
            Self::Engine(_) => "EngineError",
            Self::Delivery(_) => "DeliveryError",
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TemplateError> for PipelineError {
    fn from(err: TemplateError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ComfyUIApiError> for PipelineError {
    fn from(err: ComfyUIApiError) -> Self {
        Self::Engine(format!("Workflow submission failed: {err}"))
    }
}

impl From<MonitorError> for PipelineError {
    fn from(err: MonitorError) -> Self {
        Self::Engine(err.to_string())
    }
}
