//! Audio subsystem module

pub mod chunk;
pub mod consolidate;
pub mod pipeline;
pub mod playback;
pub mod router;
pub mod stats;

pub use chunk::{AudioFragment, ConsolidatedChunk, MessageId};
pub use consolidate::ConsolidationBuffer;
pub use pipeline::{AudioPipeline, PipelineHandle};
pub use playback::{PlaybackFeedback, PlaybackScheduler};
pub use router::{AudioRouter, RoutingDecision};
pub use stats::{ChunkStatistics, PipelineCounters, PipelineStats};
