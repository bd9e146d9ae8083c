use anyhow::Result;

use crate::frame::Frame;
use crate::track::backend::Tracker;
use crate::track::result::BoundingBox;

const DEFAULT_CELL_PX: u32 = 16;
const DEFAULT_DIFF_THRESHOLD: u8 = 18;
const DEFAULT_MIN_CELLS: usize = 2;

/// CPU tracker that follows whatever moved since the previous sampled frame.
///
/// Frames are reduced to a grid of mean-luma cells. Cells whose luma changed by
/// more than the threshold are treated as motion, and the box around them is
/// reported as the subject. A still scene yields no detection, which leaves
/// the last known position in place.
pub struct MotionTracker {
    cell_px: u32,
    diff_threshold: u8,
    min_cells: usize,
    previous: Option<LumaGrid>,
}

struct LumaGrid {
    cols: u32,
    rows: u32,
    frame_width: u32,
    frame_height: u32,
    cells: Vec<u8>,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self {
            cell_px: DEFAULT_CELL_PX,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            min_cells: DEFAULT_MIN_CELLS,
            previous: None,
        }
    }

    pub fn with_cell_size(mut self, cell_px: u32) -> Self {
        self.cell_px = cell_px.max(1);
        self
    }

    pub fn with_threshold(mut self, diff_threshold: u8) -> Self {
        self.diff_threshold = diff_threshold;
        self
    }

    pub fn with_min_cells(mut self, min_cells: usize) -> Self {
        self.min_cells = min_cells.max(1);
        self
    }

    fn compare(&self, previous: &LumaGrid, current: &LumaGrid) -> Option<BoundingBox> {
        let mut changed = 0usize;
        let (mut min_col, mut min_row) = (u32::MAX, u32::MAX);
        let (mut max_col, mut max_row) = (0u32, 0u32);
        for row in 0..current.rows {
            for col in 0..current.cols {
                let idx = (row * current.cols + col) as usize;
                if previous.cells[idx].abs_diff(current.cells[idx]) <= self.diff_threshold {
                    continue;
                }
                changed += 1;
                min_col = min_col.min(col);
                min_row = min_row.min(row);
                max_col = max_col.max(col);
                max_row = max_row.max(row);
            }
        }
        if changed < self.min_cells {
            return None;
        }

        let x0 = (min_col * self.cell_px) as f32;
        let y0 = (min_row * self.cell_px) as f32;
        let x1 = ((max_col + 1) * self.cell_px).min(current.frame_width) as f32;
        let y1 = ((max_row + 1) * self.cell_px).min(current.frame_height) as f32;
        let total = (current.cols * current.rows) as f32;
        Some(BoundingBox::from_corners(
            x0,
            y0,
            x1,
            y1,
            changed as f32 / total,
        ))
    }
}

impl Default for MotionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker for MotionTracker {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn track(&mut self, frame: &Frame) -> Result<Option<BoundingBox>> {
        let current = LumaGrid::from_frame(frame, self.cell_px);
        let detection = match &self.previous {
            Some(previous) if previous.same_shape(&current) => self.compare(previous, &current),
            _ => None,
        };
        self.previous = Some(current);
        Ok(detection)
    }
}

impl LumaGrid {
    fn from_frame(frame: &Frame, cell_px: u32) -> Self {
        let (width, height) = (frame.width(), frame.height());
        let cols = width.div_ceil(cell_px).max(1);
        let rows = height.div_ceil(cell_px).max(1);
        let mut sums = vec![0u32; (cols * rows) as usize];
        let mut counts = vec![0u32; (cols * rows) as usize];
        for (x, y, pixel) in frame.image().enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
            let idx = ((y / cell_px) * cols + x / cell_px) as usize;
            sums[idx] += luma;
            counts[idx] += 1;
        }
        let cells = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| if *count == 0 { 0 } else { (sum / count) as u8 })
            .collect();
        Self {
            cols,
            rows,
            frame_width: width,
            frame_height: height,
            cells,
        }
    }

    fn same_shape(&self, other: &LumaGrid) -> bool {
        self.cols == other.cols && self.rows == other.rows
    }
}
