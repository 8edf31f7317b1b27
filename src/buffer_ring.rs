//! Three-slot rotating buffer set.
//!
//! Within one cycle the fetch step writes slot `i`, the detect step reads slot
//! `(i + 2) % 3` and the remaining slot is idle. The index advances once per
//! cycle, so detect always reads what fetch finished writing one cycle
//! earlier and the two never touch the same slot.

use ndarray::Array3;

use crate::exchange::FrameExchange;
use crate::frame::{CorrelationId, Frame};
use crate::image_manip::prepare_input;
use crate::rgbd::DepthFrame;

pub const RING_DEPTH: usize = 3;

/// One raw frame, its depth and the pre-processed detector input.
#[derive(Debug, Clone)]
pub struct BufferSlot {
    pub raw: Frame,
    pub depth: DepthFrame,
    pub input: Array3<f32>,
    pub correlation_id: CorrelationId,
}

impl BufferSlot {
    fn seeded(frame: &Frame, depth: &DepthFrame, input: &Array3<f32>) -> Self {
        Self {
            raw: frame.clone(),
            depth: depth.clone(),
            input: input.clone(),
            correlation_id: frame.correlation_id,
        }
    }
}

pub struct BufferRing {
    slots: [BufferSlot; RING_DEPTH],
    index: usize,
    input_size: (u32, u32),
}

impl BufferRing {
    /// Seed every slot with the first available frame so the first detect
    /// cycles have valid data to read.
    pub fn new(seed: &Frame, depth: &DepthFrame, input_size: (u32, u32)) -> Self {
        let input = prepare_input(seed, input_size);
        Self {
            slots: [
                BufferSlot::seeded(seed, depth, &input),
                BufferSlot::seeded(seed, depth, &input),
                BufferSlot::seeded(seed, depth, &input),
            ],
            index: 0,
            input_size,
        }
    }

    /// Slot the fetch step writes during the current cycle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Slot the detect step reads during the current cycle.
    pub fn detect_index(&self) -> usize {
        (self.index + 2) % RING_DEPTH
    }

    /// Slot neither step touches during the current cycle.
    pub fn idle_index(&self) -> usize {
        (self.index + 1) % RING_DEPTH
    }

    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % RING_DEPTH;
        self.index
    }

    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[index % RING_DEPTH]
    }

    /// Borrow the fetch slot mutably and the detect slot shared at once.
    pub fn split(&mut self) -> (&mut BufferSlot, &BufferSlot) {
        let [a, b, c] = &mut self.slots;
        match self.index {
            0 => (a, &*c),
            1 => (b, &*a),
            _ => (c, &*b),
        }
    }

    pub fn fetcher(&self) -> Fetcher {
        Fetcher {
            input_size: self.input_size,
        }
    }
}

/// Fills a slot from the frame exchange. Copyable so it can move into the
/// fetch thread alongside the slot borrow.
#[derive(Debug, Clone, Copy)]
pub struct Fetcher {
    input_size: (u32, u32),
}

impl Fetcher {
    /// Copy the latest frame pair into `slot` and pre-process it. Returns
    /// `false` and leaves the slot untouched when nothing has arrived yet.
    pub fn fetch(&self, slot: &mut BufferSlot, exchange: &FrameExchange) -> bool {
        let Some((frame, depth)) = exchange.read_latest() else {
            return false;
        };
        slot.input = prepare_input(&frame, self.input_size);
        slot.correlation_id = frame.correlation_id;
        slot.raw = frame;
        slot.depth = depth;
        true
    }
}
