//! Pipeline metrics.

mod prometheus;

pub use self::prometheus::{Channel, PipelineMetrics};
