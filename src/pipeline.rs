//! Pipeline driver.
//!
//! One long-lived thread runs the cycle loop. Every cycle spawns a fetch and a
//! detect thread that work on disjoint slots of the [`BufferRing`], joins
//! both, then validates, annotates and publishes what detect produced.
//! Shutdown is cooperative and only observed between cycles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, debug_span, error, info, warn};

use crate::averager::TemporalAverager;
use crate::buffer_ring::{BufferRing, BufferSlot};
use crate::color_mask::{ColorValidator, ValidatedDepth};
use crate::common::Rect;
use crate::config::PipelineConfig;
use crate::detection::{BoxExtractor, ClassBuckets, DecodeParams, DetectionBox, DetectionEngine};
use crate::error::{DetectorError, Result};
use crate::exchange::FrameExchange;
use crate::output::{BoundingBoxRecord, CycleReport, PoseRecord, PublishSink, SideChannel};
use crate::pose::estimate_pose;
use crate::visualization::Annotator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    WaitingForFirstFrame,
    Running,
    Stopping,
    Stopped,
}

/// Cooperative cancellation flag shared with the owning context.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Detection engine together with the static configuration it runs under.
pub struct DetectorContext {
    engine: Box<dyn DetectionEngine>,
    config: PipelineConfig,
}

impl DetectorContext {
    pub fn new(engine: Box<dyn DetectionEngine>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        if engine.output_len() == 0 || engine.box_capacity() == 0 {
            return Err(DetectorError::invalid_config(
                "engine reports an empty output tensor",
            ));
        }
        Ok(Self { engine, config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.config.class_labels.len()
    }

    pub fn label(&self, class_id: usize) -> &str {
        self.config
            .class_labels
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

/// Detection paired with its color-validated depth.
#[derive(Debug, Clone, Copy)]
struct Assessed {
    detection: DetectionBox,
    rect: Rect,
    depth: ValidatedDepth,
}

/// Last assessed detection with a valid depth, in enumeration order.
fn select_target(assessed: &[Assessed]) -> Option<&Assessed> {
    assessed.iter().rev().find(|a| !a.depth.invalid)
}

/// Forward pass, averaging and extraction for one slot.
fn detect(
    engine: &mut dyn DetectionEngine,
    averager: &mut TemporalAverager,
    extractor: &mut BoxExtractor,
    slot: &BufferSlot,
    params: &DecodeParams,
) -> Result<Vec<DetectionBox>> {
    let prediction = engine.predict(&slot.input)?;
    averager.remember(&prediction)?;
    let frame_size = (slot.raw.width, slot.raw.height);
    let decoded = engine.decode(averager.average(), frame_size, params)?;
    Ok(extractor.extract(&decoded).to_vec())
}

pub struct PipelineDriver {
    context: DetectorContext,
    exchange: Arc<FrameExchange>,
    sink: Box<dyn PublishSink>,
    shutdown: ShutdownSignal,
    state: DriverState,
    averager: TemporalAverager,
    extractor: BoxExtractor,
    buckets: ClassBuckets,
    validator: ColorValidator,
    annotator: Annotator,
    cycles: u64,
    dumped: u64,
    fps: f32,
    last_cycle: Option<Instant>,
}

impl PipelineDriver {
    pub fn new(
        context: DetectorContext,
        exchange: Arc<FrameExchange>,
        sink: Box<dyn PublishSink>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let config = context.config();
        let averager =
            TemporalAverager::new(config.averaging_frames, context.engine.output_len())?;
        let extractor = BoxExtractor::new(context.num_classes(), context.engine.box_capacity());
        let buckets = ClassBuckets::new(context.num_classes());
        let validator = ColorValidator::new(config.intrinsics, config.sensor_offset);
        Ok(Self {
            context,
            exchange,
            sink,
            shutdown,
            state: DriverState::WaitingForFirstFrame,
            averager,
            extractor,
            buckets,
            validator,
            annotator: Annotator::default(),
            cycles: 0,
            dumped: 0,
            fps: 0.0,
            last_cycle: None,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "pipeline state change");
            self.state = next;
        }
    }

    /// Block until the first frame arrives and build the ring from it.
    /// Returns `None` when shutdown is requested first.
    pub fn start(&mut self) -> Option<BufferRing> {
        self.transition(DriverState::WaitingForFirstFrame);
        let interval = self.context.config().wait_interval();
        loop {
            if self.shutdown.is_triggered() {
                self.transition(DriverState::Stopped);
                return None;
            }
            if self.exchange.wait_for_frame(interval) {
                if let Some((frame, depth)) = self.exchange.read_latest() {
                    let ring = BufferRing::new(&frame, &depth, self.context.engine.input_size());
                    self.transition(DriverState::Running);
                    return Some(ring);
                }
            }
            info!("waiting for image");
        }
    }

    /// Drive cycles until shutdown or a fatal error.
    pub fn run(&mut self) -> Result<DriverState> {
        let Some(mut ring) = self.start() else {
            return Ok(self.state);
        };
        loop {
            if let Err(err) = self.cycle(&mut ring) {
                if err.is_fatal() {
                    error!("pipeline stopped: {err}");
                    self.transition(DriverState::Stopped);
                    return Err(err);
                }
                warn!("cycle {} failed: {err}", self.cycles);
            }
            if self.shutdown.is_triggered() {
                self.transition(DriverState::Stopping);
                break;
            }
        }
        self.transition(DriverState::Stopped);
        Ok(self.state)
    }

    /// One fetch/detect/publish cycle.
    pub fn cycle(&mut self, ring: &mut BufferRing) -> Result<()> {
        self.cycles += 1;
        ring.advance();
        let span = debug_span!("cycle", cycle = self.cycles, slot = ring.index());
        let _enter = span.enter();

        let detect_index = ring.detect_index();
        let fetcher = ring.fetcher();
        let params = self.context.config().decode_params();
        let exchange = &*self.exchange;
        let engine = self.context.engine.as_mut();
        let averager = &mut self.averager;
        let extractor = &mut self.extractor;
        let (fetch_slot, detect_slot) = ring.split();

        let boxes = thread::scope(|s| -> Result<Vec<DetectionBox>> {
            let fetch_handle = thread::Builder::new()
                .name("fetch".into())
                .spawn_scoped(s, move || fetcher.fetch(fetch_slot, exchange))?;
            let detect_handle = thread::Builder::new()
                .name("detect".into())
                .spawn_scoped(s, move || {
                    detect(engine, averager, extractor, detect_slot, &params)
                })?;
            let fetched = fetch_handle.join();
            let detected = detect_handle.join();
            if !fetched.map_err(|_| DetectorError::WorkerPanicked("fetch"))? {
                debug!("no frame available, slot keeps its previous contents");
            }
            detected.map_err(|_| DetectorError::WorkerPanicked("detect"))?
        })?;

        let slot = ring.slot(detect_index);
        self.publish(slot, &boxes)
    }

    fn publish(&mut self, slot: &BufferSlot, boxes: &[DetectionBox]) -> Result<()> {
        // the frame rate only tracks cycles that go out to the sink
        if self.context.config().dump_prefix.is_none() {
            self.update_fps();
        }
        let fps = self.fps;
        debug!(fps, detections = boxes.len(), "detected");

        self.buckets.fill(boxes);
        let (width, height) = (slot.raw.width, slot.raw.height);
        let assessed: Vec<Assessed> = self
            .buckets
            .iter()
            .map(|b| {
                let rect = b.to_pixel_rect(width, height);
                Assessed {
                    detection: *b,
                    rect,
                    depth: self.validator.validate(b.class_id, &rect, &slot.raw, &slot.depth),
                }
            })
            .collect();
        self.buckets.clear();

        let config = self.context.config();
        if config.console_output {
            info!("FPS:{fps:.1}");
            for a in &assessed {
                info!(
                    "{}: {:.0}%",
                    self.context.label(a.detection.class_id),
                    a.detection.confidence * 100.0
                );
            }
        }

        let max_boxes = config.max_published_boxes;
        if assessed.len() > max_boxes {
            warn!(
                detections = assessed.len(),
                max_boxes, "too many detections, truncating published boxes"
            );
        }
        let records: Vec<BoundingBoxRecord> = assessed
            .iter()
            .take(max_boxes)
            .map(|a| {
                BoundingBoxRecord::new(
                    self.context.label(a.detection.class_id),
                    a.detection.confidence,
                    &a.rect,
                    a.depth.invalid,
                )
            })
            .collect();

        let pose = select_target(&assessed).map(|a| {
            estimate_pose(&a.rect, &slot.depth, &config.intrinsics, a.depth.position)
        });
        let pose = pose.filter(|p| p.valid);
        if pose.is_none() && !assessed.is_empty() {
            debug!("no detection with valid depth, pose not published");
        }

        let annotated = self.annotator.annotate(&slot.raw, boxes);
        let report = CycleReport {
            cycle: self.cycles,
            correlation_id: slot.correlation_id,
            annotated,
            object_count: boxes.len(),
            boxes: records,
            pose: pose.as_ref().map(PoseRecord::from),
            side_channel: pose.as_ref().map(|p| SideChannel::from_position(&p.position)),
            fps,
        };

        match config.dump_prefix.as_deref() {
            Some(prefix) => {
                let path = PathBuf::from(format!("{prefix}_{:08}.png", self.dumped));
                self.dumped += 1;
                report.annotated.save(&path)?;
                debug!(path = %path.display(), "frame dumped");
            }
            None => {
                if config.view_image {
                    self.sink.render(&report.annotated)?;
                }
                self.sink.publish(&report)?;
            }
        }
        Ok(())
    }

    fn update_fps(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_cycle {
            self.fps = 1.0 / now.duration_since(last).as_secs_f32().max(f32::EPSILON);
        }
        self.last_cycle = Some(now);
    }

    /// Run the driver on its own named thread.
    pub fn spawn(mut self) -> Result<PipelineHandle> {
        let shutdown = self.shutdown.clone();
        let exchange = Arc::clone(&self.exchange);
        let thread = thread::Builder::new()
            .name("detector-pipeline".into())
            .spawn(move || self.run())?;
        Ok(PipelineHandle {
            shutdown,
            exchange,
            thread,
        })
    }
}

/// Owner side of a spawned pipeline.
pub struct PipelineHandle {
    shutdown: ShutdownSignal,
    exchange: Arc<FrameExchange>,
    thread: JoinHandle<Result<DriverState>>,
}

impl PipelineHandle {
    /// Frame exchange the ingestion side writes into.
    pub fn exchange(&self) -> &Arc<FrameExchange> {
        &self.exchange
    }

    /// Request a stop. The in-flight cycle, if any, still completes.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<DriverState> {
        self.thread
            .join()
            .map_err(|_| DetectorError::WorkerPanicked("pipeline"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CameraIntrinsics, SensorOffset};
    use crate::detection::ScriptedEngine;
    use crate::frame::{CorrelationId, Frame, TestPattern};
    use crate::output::{MemorySink, MemorySinkStorage};
    use crate::rgbd::DepthFrame;
    use approx::assert_abs_diff_eq;

    const RED_BGR: [u8; 3] = [0, 0, 200];

    fn config() -> PipelineConfig {
        PipelineConfig {
            class_labels: vec!["red".into(), "blue".into(), "green".into()],
            averaging_frames: 1,
            wait_for_frame_ms: 10,
            intrinsics: CameraIntrinsics::new(100.0, 100.0, 50.0, 50.0),
            sensor_offset: SensorOffset::ZERO,
            ..Default::default()
        }
    }

    fn driver(
        engine: ScriptedEngine,
        config: PipelineConfig,
    ) -> (PipelineDriver, MemorySinkStorage) {
        let (sink, storage) = MemorySink::new();
        let context = DetectorContext::new(Box::new(engine), config).unwrap();
        let driver = PipelineDriver::new(
            context,
            Arc::new(FrameExchange::new()),
            Box::new(sink),
            ShutdownSignal::new(),
        )
        .unwrap();
        (driver, storage)
    }

    fn write_red(exchange: &FrameExchange, id: i64) {
        let frame = Frame::test_pattern(100, 100, TestPattern::Solid(RED_BGR));
        let depth = DepthFrame::constant_meters(100, 100, 2.0);
        exchange.write(frame, depth, CorrelationId(id)).unwrap();
    }

    #[test]
    fn test_context_rejects_invalid_config() {
        let engine = ScriptedEngine::new((32, 32), 3, 4);
        let config = PipelineConfig {
            averaging_frames: 0,
            ..config()
        };
        assert!(DetectorContext::new(Box::new(engine), config).is_err());
    }

    #[test]
    fn test_label_lookup() {
        let context =
            DetectorContext::new(Box::new(ScriptedEngine::new((32, 32), 3, 4)), config()).unwrap();
        assert_eq!(context.num_classes(), 3);
        assert_eq!(context.label(1), "blue");
        assert_eq!(context.label(7), "unknown");
    }

    #[test]
    fn test_shutdown_before_first_frame() {
        let (mut driver, storage) = driver(ScriptedEngine::new((32, 32), 3, 4), config());
        driver.shutdown.trigger();
        assert_eq!(driver.run().unwrap(), DriverState::Stopped);
        assert_eq!(driver.cycles(), 0);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_centered_box_pose() {
        let engine =
            ScriptedEngine::new((32, 32), 3, 4).with_box(0.5, 0.5, 0.2, 0.2, &[0.9, 0.0, 0.0]);
        let (mut driver, storage) = driver(engine, config());
        write_red(&driver.exchange, 1);
        let mut ring = driver.start().unwrap();
        assert_eq!(driver.state(), DriverState::Running);
        driver.cycle(&mut ring).unwrap();

        let report = storage.last().unwrap();
        assert_eq!(report.object_count, 1);
        assert_eq!(report.boxes[0].class, "red");
        assert!(!report.boxes[0].invalid);
        let pose = report.pose.unwrap();
        assert_abs_diff_eq!(pose.z, 2.0, epsilon = 1e-5);
        // box center lands on the principal point or one pixel off
        assert_abs_diff_eq!(pose.x, 0.0, epsilon = 0.025);
        assert_abs_diff_eq!(pose.y, 0.0, epsilon = 0.025);
        let side = report.side_channel.unwrap();
        assert!(side.ready);
        assert_eq!(side.z, 2_000_000);
    }

    #[test]
    fn test_fps_not_tracked_while_dumping() {
        let dir = tempfile::tempdir().unwrap();
        let dump_config = PipelineConfig {
            dump_prefix: Some(dir.path().join("f").to_string_lossy().into_owned()),
            ..config()
        };
        let (mut dumping, _) = driver(ScriptedEngine::new((32, 32), 3, 4), dump_config);
        write_red(&dumping.exchange, 1);
        let mut ring = dumping.start().unwrap();
        for _ in 0..3 {
            dumping.cycle(&mut ring).unwrap();
        }
        assert!(dumping.last_cycle.is_none());
        assert_eq!(dumping.fps, 0.0);

        let (mut publishing, storage) = driver(ScriptedEngine::new((32, 32), 3, 4), config());
        write_red(&publishing.exchange, 1);
        let mut ring = publishing.start().unwrap();
        for _ in 0..3 {
            publishing.cycle(&mut ring).unwrap();
        }
        assert!(publishing.fps > 0.0);
        assert_eq!(storage.reports()[0].fps, 0.0);
        assert!(storage.last().unwrap().fps > 0.0);
    }

    #[test]
    fn test_color_mismatch_marks_box_invalid() {
        // blue class over a red frame
        let engine =
            ScriptedEngine::new((32, 32), 3, 4).with_box(0.5, 0.5, 0.2, 0.2, &[0.0, 0.9, 0.0]);
        let (mut driver, storage) = driver(engine, config());
        write_red(&driver.exchange, 1);
        let mut ring = driver.start().unwrap();
        driver.cycle(&mut ring).unwrap();

        let report = storage.last().unwrap();
        assert_eq!(report.object_count, 1);
        assert!(report.boxes[0].invalid);
        assert!(report.pose.is_none());
        assert!(report.side_channel.is_none());
    }

    #[test]
    fn test_select_last_valid() {
        let detection = DetectionBox {
            x: 0.5,
            y: 0.5,
            w: 0.1,
            h: 0.1,
            class_id: 0,
            confidence: 1.0,
        };
        let depth = |invalid: bool, z: f32| ValidatedDepth {
            depth: z,
            position: None,
            samples: 1,
            invalid,
        };
        let assessed = [
            Assessed { detection, rect: Rect::new(0, 0, 1, 1), depth: depth(false, 1.0) },
            Assessed { detection, rect: Rect::new(0, 0, 1, 1), depth: depth(false, 2.0) },
            Assessed { detection, rect: Rect::new(0, 0, 1, 1), depth: depth(true, 0.0) },
        ];
        assert_eq!(select_target(&assessed).unwrap().depth.depth, 2.0);
        assert!(select_target(&assessed[2..]).is_none());
    }

    #[test]
    fn test_published_boxes_are_capped() {
        let mut engine = ScriptedEngine::new((32, 32), 3, 8);
        for i in 0..5 {
            engine = engine.with_box(0.1 + 0.15 * i as f32, 0.5, 0.1, 0.1, &[0.9, 0.0, 0.0]);
        }
        let config = PipelineConfig {
            max_published_boxes: 3,
            ..config()
        };
        let (mut driver, storage) = driver(engine, config);
        write_red(&driver.exchange, 1);
        let mut ring = driver.start().unwrap();
        driver.cycle(&mut ring).unwrap();

        let report = storage.last().unwrap();
        assert_eq!(report.object_count, 5);
        assert_eq!(report.boxes.len(), 3);
    }

    #[test]
    fn test_view_image_renders_each_cycle() {
        let config = PipelineConfig {
            view_image: true,
            console_output: true,
            ..config()
        };
        let (mut driver, storage) = driver(ScriptedEngine::new((32, 32), 3, 4), config);
        write_red(&driver.exchange, 1);
        let mut ring = driver.start().unwrap();
        for _ in 0..2 {
            driver.cycle(&mut ring).unwrap();
        }
        assert_eq!(storage.rendered(), 2);
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.last().unwrap().object_count, 0);
    }
}
