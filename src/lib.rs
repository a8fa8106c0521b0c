pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod types;

// Ports and their adapters
pub mod app;
pub mod infra;

pub use error::{PipelineError, Result};
pub use pipeline::orchestrator::{AcquisitionPipeline, PipelineServices, PipelineSettings, RunOutcome};
