//! Rolling average of raw detection tensors.
//!
//! Boxes are always decoded from [`TemporalAverager::average`] rather than
//! from a single frame's prediction, which damps frame-to-frame jitter.

use ndarray::Array1;

use crate::error::{DetectorError, Result};

pub struct TemporalAverager {
    window: Vec<Array1<f32>>,
    avg: Array1<f32>,
    index: usize,
}

impl TemporalAverager {
    /// Window of `frames` zeroed tensors of length `tensor_len`. Until the
    /// window has been filled once the average is biased towards zero.
    pub fn new(frames: usize, tensor_len: usize) -> Result<Self> {
        if frames == 0 {
            return Err(DetectorError::invalid_config(
                "averaging window must hold at least one frame",
            ));
        }
        if tensor_len == 0 {
            return Err(DetectorError::invalid_config("prediction tensor must not be empty"));
        }
        Ok(Self {
            window: vec![Array1::zeros(tensor_len); frames],
            avg: Array1::zeros(tensor_len),
            index: 0,
        })
    }

    pub fn frames(&self) -> usize {
        self.window.len()
    }

    pub fn tensor_len(&self) -> usize {
        self.avg.len()
    }

    /// Store `prediction` at the current window position and advance it.
    pub fn remember(&mut self, prediction: &Array1<f32>) -> Result<()> {
        if prediction.len() != self.tensor_len() {
            return Err(DetectorError::engine(format!(
                "prediction has {} values, expected {}",
                prediction.len(),
                self.tensor_len()
            )));
        }
        self.window[self.index].assign(prediction);
        self.index = (self.index + 1) % self.window.len();
        Ok(())
    }

    /// Mean of every window slot, recomputed from scratch on each call.
    pub fn average(&mut self) -> &Array1<f32> {
        let weight = 1.0 / self.window.len() as f32;
        self.avg.fill(0.0);
        for prediction in &self.window {
            self.avg.scaled_add(weight, prediction);
        }
        &self.avg
    }
}
