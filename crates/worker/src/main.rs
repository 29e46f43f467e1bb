//! Video generation worker.
//!
//! Runs exactly one job per invocation: reads the job JSON from the
//! path given as the first argument (or stdin), runs the pipeline, and
//! prints the result object to stdout.

use std::path::PathBuf;

use vidgen_pipeline::config::PipelineConfig;
use vidgen_pipeline::controller::{JobOutcome, Pipeline};
use vidgen_worker::{init_tracing, parse_envelope, read_job_text};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let job_path = std::env::args_os().nth(1).map(PathBuf::from);
    let text = read_job_text(job_path.as_deref()).await?;

    let outcome = match parse_envelope(&text) {
        Ok(envelope) => {
            let pipeline = Pipeline::new(PipelineConfig::from_env());
            tracing::info!(
                job_id = envelope.id.as_deref().unwrap_or("-"),
                client_id = %pipeline.client_id(),
                "Worker starting",
            );
            pipeline.run(&envelope.input).await
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Rejecting malformed job");
            JobOutcome::invalid_input(format!("{e:#}"))
        }
    };
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}
