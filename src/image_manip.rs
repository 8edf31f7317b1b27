//! Detector input preparation: channel reorder and letterbox resize.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array3;

use crate::frame::Frame;

/// Gray used for letterbox padding (0.5 after normalization).
const LETTERBOX_FILL: u8 = 127;

/// Scale and offsets applied by a letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxGeometry {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Fit `src` into `dst` keeping the aspect ratio, centered.
pub fn letterbox_geometry(src: (u32, u32), dst: (u32, u32)) -> LetterboxGeometry {
    let (sw, sh) = src;
    let (dw, dh) = dst;
    let (scaled_width, scaled_height) = if (dw as u64) * (sh as u64) < (dh as u64) * (sw as u64) {
        (dw, ((sh as u64 * dw as u64) / sw as u64) as u32)
    } else {
        (((sw as u64 * dh as u64) / sh as u64) as u32, dh)
    };
    let scaled_width = scaled_width.max(1);
    let scaled_height = scaled_height.max(1);
    LetterboxGeometry {
        scaled_width,
        scaled_height,
        offset_x: (dw - scaled_width) / 2,
        offset_y: (dh - scaled_height) / 2,
    }
}

/// Letterbox `image` into a `size` canvas padded with gray.
pub fn letterbox(image: &RgbImage, size: (u32, u32)) -> RgbImage {
    let geometry = letterbox_geometry(image.dimensions(), size);
    let scaled = imageops::resize(
        image,
        geometry.scaled_width,
        geometry.scaled_height,
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(size.0, size.1, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(
        &mut canvas,
        &scaled,
        geometry.offset_x as i64,
        geometry.offset_y as i64,
    );
    canvas
}

/// Planar CHW tensor in `[0, 1]`.
pub fn to_planar(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        image.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
    })
}

/// BGR frame → RGB → letterboxed planar tensor of shape `(3, h, w)`.
pub fn prepare_input(frame: &Frame, size: (u32, u32)) -> Array3<f32> {
    let rgb = frame.to_rgb_image();
    to_planar(&letterbox(&rgb, size))
}
