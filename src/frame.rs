//! Color frames handed over by the ingestion side

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

/// Opaque identifier tying a result back to the request that produced the frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub i64);

/// Interleaved 8-bit color frame, BGR channel order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub correlation_id: CorrelationId,
}

impl Frame {
    pub const BGR_CHANNELS: usize = 3;

    /// Create a BGR frame, validating the buffer length.
    pub fn from_bgr(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let expected = width * height * Self::BGR_CHANNELS;
        if data.len() != expected || width == 0 || height == 0 {
            return Err(DetectorError::FrameFormat {
                expected: format!("{width}x{height} bgr8 ({expected} bytes)"),
                actual: format!("{} bytes", data.len()),
            });
        }
        Ok(Frame {
            data,
            width,
            height,
            channels: Self::BGR_CHANNELS,
            correlation_id: CorrelationId::default(),
        })
    }

    /// Blank frame used to size buffers before the first real frame arrives.
    pub fn blank(width: usize, height: usize) -> Self {
        Frame {
            data: vec![0u8; width * height * Self::BGR_CHANNELS],
            width,
            height,
            channels: Self::BGR_CHANNELS,
            correlation_id: CorrelationId::default(),
        }
    }

    /// Create a test pattern frame (useful for demos and tests)
    pub fn test_pattern(width: usize, height: usize, pattern_type: TestPattern) -> Self {
        let mut data = Vec::with_capacity(width * height * Self::BGR_CHANNELS);
        for i in 0..height * width {
            let x = i % width;
            let y = i / width;
            let bgr = match pattern_type {
                TestPattern::Solid(bgr) => bgr,
                TestPattern::Gradient => {
                    let v = ((x + y) % 256) as u8;
                    [v, v, v]
                }
                TestPattern::Checkerboard => {
                    if (x / 32 + y / 32) % 2 == 0 {
                        [255, 255, 255]
                    } else {
                        [0, 0, 0]
                    }
                }
            };
            data.extend_from_slice(&bgr);
        }

        Frame {
            data,
            width,
            height,
            channels: Self::BGR_CHANNELS,
            correlation_id: CorrelationId::default(),
        }
    }

    /// Set correlation id for tracking
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = id;
        self
    }

    /// BGR triple at `(x, y)`. Caller guarantees bounds.
    pub fn bgr_at(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * self.channels;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Copy into an RGB image, swapping the channel order.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let [b, g, r] = self.bgr_at(x as usize, y as usize);
            image::Rgb([r, g, b])
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Uniform BGR color
    Solid([u8; 3]),
    Gradient,
    Checkerboard,
}
