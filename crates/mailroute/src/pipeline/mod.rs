//! Per-message processing from raw bytes to a routed, indexed message.

pub mod error;
pub mod runner;

pub use error::{PipelineError, PipelineStage};
pub use runner::{MessagePipeline, ProcessedMessage};
