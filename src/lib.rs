pub mod error;
pub mod common;
pub mod frame;
pub mod rgbd;
pub mod exchange;
pub mod image_manip;
pub mod buffer_ring;
pub mod averager;
pub mod detection;
pub mod pose;
pub mod color_mask;
pub mod visualization;
pub mod output;
pub mod config;
pub mod pipeline;

// Re-export main types for convenience
pub use crate::error::{DetectorError, Result};
pub use crate::common::{CameraIntrinsics, Rect, SensorOffset};
pub use crate::frame::{CorrelationId, Frame, TestPattern};
pub use crate::rgbd::{back_project, DepthFrame, DepthUnit};
pub use crate::exchange::FrameExchange;
pub use crate::buffer_ring::{BufferRing, BufferSlot};
pub use crate::averager::TemporalAverager;
pub use crate::detection::{
    BoxExtractor, ClassBuckets, DecodeParams, DecodedBox, DetectionBox, DetectionEngine,
    ScriptedEngine,
};
pub use crate::pose::{estimate_pose, Detection3DPose};
pub use crate::color_mask::{ColorFamily, ColorValidator, ValidatedDepth};
pub use crate::output::{
    BoundingBoxRecord, CycleReport, JsonLinesSink, MemorySink, MemorySinkStorage, PoseRecord,
    PublishSink, SideChannel,
};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{
    DetectorContext, DriverState, PipelineDriver, PipelineHandle, ShutdownSignal,
};
