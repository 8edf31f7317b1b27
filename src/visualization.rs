//! Annotated detection images.
//!
//! Boxes are drawn onto an RGB copy of the detected frame with a color per
//! class. The result is what the publish sink receives every cycle and what
//! file-dump mode writes to disk.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect as DrawRect;

use crate::color_mask::ColorFamily;
use crate::common::Rect;
use crate::detection::DetectionBox;
use crate::frame::Frame;

const FALLBACK_PALETTE: [[u8; 3]; 6] = [
    [255, 0, 255],
    [0, 255, 255],
    [255, 128, 0],
    [128, 0, 255],
    [0, 128, 128],
    [255, 255, 255],
];

/// Outline color for a class.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    let rgb = match ColorFamily::for_class(class_id) {
        Some(ColorFamily::Red) => [230, 40, 40],
        Some(ColorFamily::Blue) => [40, 90, 230],
        Some(ColorFamily::Green) => [40, 200, 70],
        Some(ColorFamily::Yellow) => [240, 220, 30],
        Some(ColorFamily::Black) => [128, 128, 128],
        None => FALLBACK_PALETTE[class_id % FALLBACK_PALETTE.len()],
    };
    Rgb(rgb)
}

pub struct Annotator {
    thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self { thickness: 2 }
    }
}

impl Annotator {
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
        }
    }

    /// Outline `rect` (inclusive pixel bounds) growing inwards.
    pub fn draw_box(&self, image: &mut RgbImage, rect: &Rect, color: Rgb<u8>) {
        let (w, h) = image.dimensions();
        let Some(area) = rect.clamp_to(w as usize, h as usize) else {
            return;
        };
        for inset in 0..self.thickness as i32 {
            let width = area.width() - 2 * inset + 1;
            let height = area.height() - 2 * inset + 1;
            if width <= 0 || height <= 0 {
                break;
            }
            let outline = DrawRect::at(area.xmin + inset, area.ymin + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, outline, color);
        }
    }

    pub fn annotate(&self, frame: &Frame, boxes: &[DetectionBox]) -> RgbImage {
        let mut image = frame.to_rgb_image();
        for b in boxes {
            let rect = b.to_pixel_rect(frame.width, frame.height);
            self.draw_box(&mut image, &rect, class_color(b.class_id));
        }
        image
    }
}
