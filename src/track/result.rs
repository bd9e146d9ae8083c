use serde::Serialize;
use std::fmt;

/// One tracked subject, in frame pixel coordinates.
///
/// Boxes are center-based (`cx`, `cy`, `w`, `h`), the layout YOLO-style
/// trackers emit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Build from corner coordinates.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32, confidence: f32) -> Self {
        Self {
            cx: (x0 + x1) / 2.0,
            cy: (y0 + y1) / 2.0,
            w: (x1 - x0).abs(),
            h: (y1 - y0).abs(),
            confidence,
        }
    }

    /// Box center truncated to whole pixels.
    pub fn center(&self) -> Position {
        Position {
            x: self.cx as i32,
            y: self.cy as i32,
        }
    }
}

/// Last known subject position in whole pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// ASCII `"x,y"` as sent to the behavior logger.
    pub fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_truncates_to_pixels() {
        let bbox = BoundingBox {
            cx: 120.9,
            cy: 64.2,
            w: 30.0,
            h: 40.0,
            confidence: 0.9,
        };
        assert_eq!(bbox.center(), Position::new(120, 64));
        assert_eq!(bbox.center().to_payload(), "120,64");
    }

    #[test]
    fn corners_convert_to_center_form() {
        let bbox = BoundingBox::from_corners(10.0, 20.0, 30.0, 60.0, 0.5);
        assert_eq!((bbox.cx, bbox.cy, bbox.w, bbox.h), (20.0, 40.0, 20.0, 40.0));
    }
}
