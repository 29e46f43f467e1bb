//! Domain types shared by the video generation worker.
//!
//! Holds the job request model, dimension rounding, and the naming
//! rules for generated artifacts. Nothing in this crate performs I/O.

pub mod error;
pub mod naming;
pub mod request;
pub mod resolution;
pub mod types;
