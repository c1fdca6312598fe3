//! Outbound video
//!
//! Collaborator interfaces, the streaming pipeline, and the two built-in
//! collaborators used by the binary (test pattern capture, IVF replay).

pub mod ivf;
pub mod pipeline;
pub mod source;
pub mod synthetic;

pub use ivf::IvfReplayFactory;
pub use pipeline::{PipelineConfig, PipelineExit, PipelineState, StreamingPipeline};
pub use source::{
    CaptureProvider, CaptureProviderFactory, EncoderFactory, FrameEncoder, RawFrame, SampleSink,
    VideoSize,
};
pub use synthetic::TestPatternFactory;
