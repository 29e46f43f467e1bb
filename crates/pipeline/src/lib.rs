//! Video generation job pipeline.
//!
//! Resolves input images, binds them with the job parameters into a
//! ComfyUI workflow, runs it, finds the produced video, and uploads it
//! to object storage. [`controller::Pipeline`] is the entry point.

pub mod artifact;
pub mod config;
pub mod context;
pub mod controller;
pub mod delivery;
pub mod discovery;
pub mod error;
pub mod input;
pub mod template;
