//! Per-cycle results and the sinks that receive them.

use std::io::Write;
use std::sync::Arc;

use image::RgbImage;
use nalgebra::Vector3;
use parking_lot::Mutex;
use serde::Serialize;

use crate::common::Rect;
use crate::error::Result;
use crate::frame::CorrelationId;
use crate::pose::Detection3DPose;

/// Scale from metres to the integer micrometres of the side channel.
pub const SIDE_CHANNEL_SCALE: f32 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBoxRecord {
    pub class: String,
    pub probability: f32,
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
    /// No color-matched depth inside the box
    pub invalid: bool,
}

impl BoundingBoxRecord {
    pub fn new(class: impl Into<String>, probability: f32, rect: &Rect, invalid: bool) -> Self {
        Self {
            class: class.into(),
            probability,
            xmin: rect.xmin,
            ymin: rect.ymin,
            xmax: rect.xmax,
            ymax: rect.ymax,
            invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoseRecord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Quaternion as `[x, y, z, w]`
    pub orientation: [f32; 4],
}

impl From<&Detection3DPose> for PoseRecord {
    fn from(pose: &Detection3DPose) -> Self {
        let q = pose.orientation.quaternion();
        Self {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
            orientation: [q.i, q.j, q.k, q.w],
        }
    }
}

/// Low-level numeric triple for consumers that cannot parse records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SideChannel {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub ready: bool,
}

impl SideChannel {
    /// Position in metres to truncated micrometres.
    pub fn from_position(position: &Vector3<f32>) -> Self {
        Self {
            x: (position.x * SIDE_CHANNEL_SCALE) as i32,
            y: (position.y * SIDE_CHANNEL_SCALE) as i32,
            z: (position.z * SIDE_CHANNEL_SCALE) as i32,
            ready: true,
        }
    }
}

/// Everything one pipeline cycle publishes.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub correlation_id: CorrelationId,
    #[serde(skip)]
    pub annotated: RgbImage,
    pub object_count: usize,
    pub boxes: Vec<BoundingBoxRecord>,
    pub pose: Option<PoseRecord>,
    pub side_channel: Option<SideChannel>,
    pub fps: f32,
}

/// Receiver of cycle results.
pub trait PublishSink: Send {
    fn publish(&mut self, report: &CycleReport) -> Result<()>;

    /// Called with the annotated image when on-screen display is enabled.
    fn render(&mut self, _image: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to the reports collected by a [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub struct MemorySinkStorage {
    reports: Arc<Mutex<Vec<CycleReport>>>,
    rendered: Arc<Mutex<usize>>,
}

impl MemorySinkStorage {
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().clone()
    }

    pub fn last(&self) -> Option<CycleReport> {
        self.reports.lock().last().cloned()
    }

    pub fn rendered(&self) -> usize {
        *self.rendered.lock()
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    storage: MemorySinkStorage,
}

impl MemorySink {
    pub fn new() -> (Self, MemorySinkStorage) {
        let storage = MemorySinkStorage::default();
        (
            Self {
                storage: storage.clone(),
            },
            storage,
        )
    }
}

impl PublishSink for MemorySink {
    fn publish(&mut self, report: &CycleReport) -> Result<()> {
        self.storage.reports.lock().push(report.clone());
        Ok(())
    }

    fn render(&mut self, _image: &RgbImage) -> Result<()> {
        *self.storage.rendered.lock() += 1;
        Ok(())
    }
}

/// Writes one JSON object per cycle. The annotated image is not included.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> PublishSink for JsonLinesSink<W> {
    fn publish(&mut self, report: &CycleReport) -> Result<()> {
        serde_json::to_writer(&mut self.writer, report)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    fn report() -> CycleReport {
        CycleReport {
            cycle: 4,
            correlation_id: CorrelationId(17),
            annotated: RgbImage::new(2, 2),
            object_count: 1,
            boxes: vec![BoundingBoxRecord::new("red", 0.5, &Rect::new(1, 2, 3, 4), false)],
            pose: None,
            side_channel: None,
            fps: 10.0,
        }
    }

    #[test]
    fn test_side_channel_truncates_to_micrometres() {
        let sc = SideChannel::from_position(&Vector3::new(0.25, -0.5, 2.0));
        assert_eq!((sc.x, sc.y, sc.z), (250_000, -500_000, 2_000_000));
        assert!(sc.ready);
    }

    #[test]
    fn test_pose_record_orientation_order() {
        let pose = Detection3DPose {
            position: Vector3::new(1.0, 2.0, 3.0),
            orientation: UnitQuaternion::identity(),
            valid: true,
        };
        let rec = PoseRecord::from(&pose);
        assert_eq!(rec.orientation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!((rec.x, rec.y, rec.z), (1.0, 2.0, 3.0));
    }

    #[test]
    fn test_memory_sink_shares_storage() {
        let (mut sink, storage) = MemorySink::new();
        assert!(storage.is_empty());
        sink.publish(&report()).unwrap();
        sink.render(&RgbImage::new(1, 1)).unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.rendered(), 1);
        assert_eq!(storage.last().unwrap().correlation_id, CorrelationId(17));
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&report()).unwrap();
        sink.publish(&report()).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["correlation_id"], 17);
        assert_eq!(value["boxes"][0]["class"], "red");
        assert!(value.get("annotated").is_none());
    }
}
