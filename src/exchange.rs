//! Latest-value hand-off between the ingestion context and the pipeline.
//!
//! Writers replace the color/depth pair under an exclusive lock, readers take
//! copies under a shared lock. Nothing handed out aliases ingestion memory.

use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::warn;

use crate::error::{DetectorError, Result};
use crate::frame::{CorrelationId, Frame};
use crate::rgbd::DepthFrame;

struct Latest {
    frame: Frame,
    depth: DepthFrame,
}

#[derive(Default)]
pub struct FrameExchange {
    latest: RwLock<Option<Latest>>,
    arrived: Mutex<bool>,
    signal: Condvar,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest color/depth pair.
    ///
    /// A pair that fails validation is rejected and the previous contents stay
    /// in place.
    pub fn write(&self, mut frame: Frame, depth: DepthFrame, id: CorrelationId) -> Result<()> {
        if frame.width == 0
            || frame.height == 0
            || frame.channels != Frame::BGR_CHANNELS
            || frame.data.len() != frame.width * frame.height * frame.channels
        {
            let err = DetectorError::FrameFormat {
                expected: "bgr8".to_string(),
                actual: format!(
                    "{}x{}x{} with {} bytes",
                    frame.width,
                    frame.height,
                    frame.channels,
                    frame.data.len()
                ),
            };
            warn!("dropping incoming frame: {err}");
            return Err(err);
        }
        if (frame.width, frame.height) != (depth.width, depth.height) {
            let err = DetectorError::DimensionMismatch {
                color: (frame.width, frame.height),
                depth: (depth.width, depth.height),
            };
            warn!("dropping incoming frame: {err}");
            return Err(err);
        }
        if depth.sample_count() != depth.width * depth.height {
            let err = DetectorError::FrameFormat {
                expected: format!(
                    "{}x{} depth ({} samples)",
                    depth.width,
                    depth.height,
                    depth.width * depth.height
                ),
                actual: format!("{} samples", depth.sample_count()),
            };
            warn!("dropping incoming frame: {err}");
            return Err(err);
        }

        frame.correlation_id = id;
        *self.latest.write() = Some(Latest { frame, depth });

        let mut arrived = self.arrived.lock();
        *arrived = true;
        self.signal.notify_all();
        Ok(())
    }

    pub fn read_latest_frame(&self) -> Option<Frame> {
        self.latest.read().as_ref().map(|l| l.frame.clone())
    }

    pub fn read_latest_depth(&self) -> Option<DepthFrame> {
        self.latest.read().as_ref().map(|l| l.depth.clone())
    }

    /// Copy of both frames taken under one shared lock, so they always belong
    /// to the same arrival.
    pub fn read_latest(&self) -> Option<(Frame, DepthFrame)> {
        self.latest
            .read()
            .as_ref()
            .map(|l| (l.frame.clone(), l.depth.clone()))
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.latest.read().as_ref().map(|l| l.frame.correlation_id)
    }

    pub fn has_frame(&self) -> bool {
        *self.arrived.lock()
    }

    /// Block for at most `timeout` until a first frame has arrived.
    pub fn wait_for_frame(&self, timeout: Duration) -> bool {
        let mut arrived = self.arrived.lock();
        if !*arrived {
            let _ = self.signal.wait_for(&mut arrived, timeout);
        }
        *arrived
    }
}
