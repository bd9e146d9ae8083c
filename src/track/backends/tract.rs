#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::frame::Frame;
use crate::track::backend::Tracker;
use crate::track::result::BoundingBox;

/// Tract-based tracker for YOLO-style ONNX detectors.
///
/// Expects a single `[1, 3, S, S]` float input and a `[1, 4 + C, N]` output
/// (or its transpose) holding center-form boxes in input pixels followed by
/// per-class scores. The highest-scoring box of the configured class wins.
pub struct TractTracker {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
    class_id: usize,
    confidence_threshold: f32,
}

impl TractTracker {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_id: 0,
            confidence_threshold: 0.25,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Track a class other than class 0.
    pub fn with_class(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn best_box(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Option<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let (_, d1, d2) = view.dim();
        // Attribute axis is the short one: 4 box values + class scores.
        let attrs_first = d1 < d2;
        let (attrs, count) = if attrs_first { (d1, d2) } else { (d2, d1) };
        let score_idx = 4 + self.class_id;
        if score_idx >= attrs {
            return Err(anyhow!(
                "class {} out of range for model with {} classes",
                self.class_id,
                attrs.saturating_sub(4)
            ));
        }
        let at = |attr: usize, n: usize| {
            if attrs_first {
                view[[0, attr, n]]
            } else {
                view[[0, n, attr]]
            }
        };

        let mut best: Option<(usize, f32)> = None;
        for n in 0..count {
            let score = at(score_idx, n);
            if score < self.confidence_threshold {
                continue;
            }
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((n, score));
            }
        }
        let Some((n, score)) = best else {
            return Ok(None);
        };

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;
        Ok(Some(BoundingBox {
            cx: at(0, n) * sx,
            cy: at(1, n) * sy,
            w: at(2, n) * sx,
            h: at(3, n) * sy,
            confidence: score,
        }))
    }
}

impl Tracker for TractTracker {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn track(&mut self, frame: &Frame) -> Result<Option<BoundingBox>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.best_box(outputs, frame)
    }
}
