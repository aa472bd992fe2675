//! Pipeline orchestration.

mod pipeline;

pub use pipeline::{PipelineEngine, PipelineEngineBuilder, PipelineSettings, RunningStats};
