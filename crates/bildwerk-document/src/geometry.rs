// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Segment geometry: integer polygons in page coordinates and the affine
// transforms that map page coordinates into the pixel space of a derived image.

use bildwerk_core::error::BildwerkError;
use serde::{Deserialize, Serialize};

/// A vertex in absolute page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Closed polygon outlining a segment.
///
/// Serialized in the familiar `"x1,y1 x2,y2 ..."` points notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    /// Build a polygon from at least three vertices.
    pub fn new(points: Vec<Point>) -> Result<Self, BildwerkError> {
        if points.len() < 3 {
            return Err(BildwerkError::ImageError(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        Ok(Self { points })
    }

    /// Axis-aligned rectangle with top-left corner `(x, y)`.
    pub fn rect(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            points: vec![
                Point::new(x, y),
                Point::new(x + width, y),
                Point::new(x + width, y + height),
                Point::new(x, y + height),
            ],
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Parse the `"x1,y1 x2,y2 ..."` notation.
    pub fn parse(text: &str) -> Result<Self, BildwerkError> {
        let mut points = Vec::new();
        for pair in text.split_whitespace() {
            let (x, y) = pair.split_once(',').ok_or_else(|| {
                BildwerkError::ImageError(format!("malformed point '{pair}' in '{text}'"))
            })?;
            let parse = |v: &str| {
                v.trim().parse::<i32>().map_err(|_| {
                    BildwerkError::ImageError(format!("malformed coordinate '{v}' in '{text}'"))
                })
            };
            points.push(Point::new(parse(x)?, parse(y)?));
        }
        Self::new(points)
    }
}

impl std::fmt::Display for Polygon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self
            .points
            .iter()
            .map(|p| format!("{},{}", p.x, p.y))
            .collect();
        f.write_str(&joined.join(" "))
    }
}

impl TryFrom<String> for Polygon {
    type Error = BildwerkError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl From<Polygon> for String {
    fn from(polygon: Polygon) -> Self {
        polygon.to_string()
    }
}

/// Integer pixel rectangle, `x0..x1` by `y0..y1` (exclusive upper bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

/// Bounding box of real-valued points, clipped to a `width` x `height` image.
pub fn clipped_bbox(points: &[(f64, f64)], width: u32, height: u32) -> PixelBox {
    let clamp = |v: f64, max: u32| v.max(0.0).min(max as f64) as u32;
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if points.is_empty() {
        return PixelBox { x0: 0, y0: 0, x1: 0, y1: 0 };
    }
    PixelBox {
        x0: clamp(min_x.floor(), width),
        y0: clamp(min_y.floor(), height),
        x1: clamp(max_x.ceil(), width),
        y1: clamp(max_y.ceil(), height),
    }
}

/// Even-odd point-in-polygon test on real-valued vertices.
pub fn polygon_contains(polygon: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) {
            let x_cross = xj + (y - yj) * (xi - xj) / (yi - yj);
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Affine map from absolute page coordinates into the pixel space of one
/// derived image.
///
/// Stored as the top two rows of a 3x3 matrix:
/// `x' = m[0][0]*x + m[0][1]*y + m[0][2]`, `y' = m[1][0]*x + m[1][1]*y + m[1][2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordTransform {
    m: [[f64; 3]; 2],
}

impl Default for CoordTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl CoordTransform {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    /// Translation by `(dx, dy)`.
    pub fn shift(dx: f64, dy: f64) -> Self {
        Self {
            m: [[1.0, 0.0, dx], [0.0, 1.0, dy]],
        }
    }

    /// Counter-clockwise rotation by `degrees` about `(cx, cy)`, in image
    /// coordinates (y axis pointing down).
    pub fn rotation(degrees: f64, cx: f64, cy: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            m: [
                [cos, sin, cx - cos * cx - sin * cy],
                [-sin, cos, cy + sin * cx - cos * cy],
            ],
        }
    }

    /// Apply `self` first, then `next`.
    pub fn then(&self, next: &CoordTransform) -> CoordTransform {
        let a = &next.m;
        let b = &self.m;
        let mut m = [[0.0; 3]; 2];
        for (row, out) in m.iter_mut().enumerate() {
            out[0] = a[row][0] * b[0][0] + a[row][1] * b[1][0];
            out[1] = a[row][0] * b[0][1] + a[row][1] * b[1][1];
            out[2] = a[row][0] * b[0][2] + a[row][1] * b[1][2] + a[row][2];
        }
        CoordTransform { m }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m[0][0] * x + self.m[0][1] * y + self.m[0][2],
            self.m[1][0] * x + self.m[1][1] * y + self.m[1][2],
        )
    }

    pub fn apply_polygon(&self, polygon: &Polygon) -> Vec<(f64, f64)> {
        polygon
            .points()
            .iter()
            .map(|p| self.apply(p.x as f64, p.y as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn polygon_points_notation() {
        let polygon = Polygon::parse("10,20 110,20 110,70 10,70").expect("parse");
        assert_eq!(polygon, Polygon::rect(10, 20, 100, 50));
        assert_eq!(polygon.to_string(), "10,20 110,20 110,70 10,70");
        assert!(Polygon::parse("10,20 30,40").is_err());
        assert!(Polygon::parse("10;20 1,1 2,2").is_err());
    }

    #[test]
    fn shift_then_rotate_composes_in_order() {
        let t = CoordTransform::shift(-10.0, -10.0).then(&CoordTransform::rotation(90.0, 0.0, 0.0));
        // (11, 10) → (1, 0) → rotated 90° counter-clockwise → (0, -1).
        assert!(close(t.apply(11.0, 10.0), (0.0, -1.0)));
    }

    #[test]
    fn rotation_about_center_keeps_center() {
        let t = CoordTransform::rotation(33.0, 50.0, 25.0);
        assert!(close(t.apply(50.0, 25.0), (50.0, 25.0)));
    }

    #[test]
    fn bbox_is_clipped_to_image() {
        let pts = vec![(-5.0, 2.5), (120.2, 2.5), (120.2, 40.0)];
        let bbox = clipped_bbox(&pts, 100, 30);
        assert_eq!(bbox, PixelBox { x0: 0, y0: 2, x1: 100, y1: 30 });
        assert_eq!(bbox.width(), 100);
        assert!(!bbox.is_empty());
    }

    #[test]
    fn even_odd_containment() {
        let triangle = vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        assert!(polygon_contains(&triangle, 2.0, 2.0));
        assert!(!polygon_contains(&triangle, 8.0, 8.0));
    }
}
