//! Runs the pipeline on a synthetic RGB-D stream and prints one JSON line per
//! cycle. Pass a JSON config path as the first argument to override defaults.
//!
//! `RUST_LOG=rgbd_detector=debug cargo run --example synthetic_pipeline`

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rgbd_detector::{
    CorrelationId, DepthFrame, DetectorContext, Frame, FrameExchange, JsonLinesSink,
    PipelineConfig, PipelineDriver, Result, ScriptedEngine, ShutdownSignal,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WIDTH: usize = 160;
const HEIGHT: usize = 120;

/// Red square drifting over a gray background, standing on a tilted floor.
fn synthetic_pair(step: usize) -> Result<(Frame, DepthFrame)> {
    let side = 30;
    let x0 = 20 + (step * 2) % (WIDTH - side - 40);
    let y0 = 45;
    let mut bgr = vec![90u8; WIDTH * HEIGHT * 3];
    let mut depth = Vec::with_capacity(WIDTH * HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                let i = (y * WIDTH + x) * 3;
                bgr[i..i + 3].copy_from_slice(&[20, 20, 210]);
                depth.push(1200 + (x - x0) as u16 * 4);
            } else {
                depth.push(2500 - y as u16 * 5);
            }
        }
    }
    Ok((
        Frame::from_bgr(WIDTH, HEIGHT, bgr)?,
        DepthFrame::from_millimeters(WIDTH, HEIGHT, depth)?,
    ))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig {
            class_labels: vec!["red_block".into(), "blue_block".into(), "green_block".into()],
            console_output: true,
            ..Default::default()
        },
    };

    let shutdown = ShutdownSignal::new();
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_shutdown.trigger()) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }

    // the scripted box follows the square's first position only
    let engine = ScriptedEngine::new((96, 96), config.class_labels.len(), 8).with_box(
        (20.0 + 15.0) / WIDTH as f32,
        (45.0 + 15.0) / HEIGHT as f32,
        30.0 / WIDTH as f32,
        30.0 / HEIGHT as f32,
        &[0.9],
    );
    let exchange = Arc::new(FrameExchange::new());
    let context = DetectorContext::new(Box::new(engine), config)?;
    let sink = JsonLinesSink::new(io::stdout());
    let driver = PipelineDriver::new(
        context,
        Arc::clone(&exchange),
        Box::new(sink),
        shutdown.clone(),
    )?;
    let handle = driver.spawn()?;

    let mut step = 0;
    while !shutdown.is_triggered() && !handle.is_finished() && step < 300 {
        let (frame, depth) = synthetic_pair(step)?;
        if let Err(err) = exchange.write(frame, depth, CorrelationId(step as i64)) {
            warn!("frame {step} rejected: {err}");
        }
        step += 1;
        thread::sleep(Duration::from_millis(33));
    }

    handle.shutdown();
    let state = handle.join()?;
    info!(?state, frames = step, "done");
    Ok(())
}
