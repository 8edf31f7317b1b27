//! Pipeline configuration, loaded from JSON.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{CameraIntrinsics, SensorOffset};
use crate::detection::DecodeParams;
use crate::error::{DetectorError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum class probability kept by the decoder
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_hier_threshold")]
    pub hier_threshold: f32,
    /// IoU above which overlapping boxes are suppressed
    #[serde(default = "default_nms")]
    pub nms: f32,
    /// Number of raw predictions averaged before decoding
    #[serde(default = "default_averaging_frames")]
    pub averaging_frames: usize,
    /// Poll interval while waiting for the first frame
    #[serde(default = "default_wait_for_frame_ms")]
    pub wait_for_frame_ms: u64,
    #[serde(default)]
    pub class_labels: Vec<String>,
    #[serde(default)]
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub sensor_offset: SensorOffset,
    /// Hand the annotated image to the sink's renderer every cycle
    #[serde(default)]
    pub view_image: bool,
    /// Log FPS and every detection each cycle
    #[serde(default)]
    pub console_output: bool,
    /// Save annotated frames as `<prefix>_<count>.png` instead of publishing
    #[serde(default)]
    pub dump_prefix: Option<String>,
    #[serde(default = "default_max_published_boxes")]
    pub max_published_boxes: usize,
}

fn default_threshold() -> f32 {
    0.3
}

fn default_hier_threshold() -> f32 {
    0.5
}

fn default_nms() -> f32 {
    0.4
}

fn default_averaging_frames() -> usize {
    3
}

fn default_wait_for_frame_ms() -> u64 {
    2000
}

fn default_max_published_boxes() -> usize {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            hier_threshold: default_hier_threshold(),
            nms: default_nms(),
            averaging_frames: default_averaging_frames(),
            wait_for_frame_ms: default_wait_for_frame_ms(),
            class_labels: Vec::new(),
            intrinsics: CameraIntrinsics::default(),
            sensor_offset: SensorOffset::default(),
            view_image: false,
            console_output: false,
            dump_prefix: None,
            max_published_boxes: default_max_published_boxes(),
        }
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("hier_threshold", self.hier_threshold),
            ("nms", self.nms),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::invalid_config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.averaging_frames == 0 {
            return Err(DetectorError::invalid_config("averaging_frames must be at least 1"));
        }
        if self.class_labels.is_empty() {
            return Err(DetectorError::invalid_config("class_labels must not be empty"));
        }
        let CameraIntrinsics { fx, fy, .. } = self.intrinsics;
        if !(fx.is_finite() && fy.is_finite() && fx != 0.0 && fy != 0.0) {
            return Err(DetectorError::invalid_config(format!(
                "focal lengths must be finite and non-zero, got fx={fx} fy={fy}"
            )));
        }
        if matches!(self.dump_prefix.as_deref(), Some("")) {
            return Err(DetectorError::invalid_config("dump_prefix must not be empty"));
        }
        Ok(())
    }

    pub fn decode_params(&self) -> DecodeParams {
        DecodeParams {
            threshold: self.threshold,
            hier_threshold: self.hier_threshold,
            nms: self.nms,
        }
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_for_frame_ms)
    }
}
