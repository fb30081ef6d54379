use serde::{Deserialize, Serialize};

use crate::photo::ImageShape;

/// Hu values whose magnitude is at or below this are ignored by [`match_shapes`].
const HU_EPSILON: f64 = 1e-5;

/// A quadrilateral in destination image coordinates: the boundary of a portal photo
/// mapped into the IFS image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour {
    pub points: [(i32, i32); 4],
}

impl Contour {
    /// Rounds floating point corners to the integer pixel grid.
    pub fn from_corners(corners: &[(f64, f64); 4]) -> Contour {
        let mut points = [(0i32, 0i32); 4];
        for (point, &(x, y)) in points.iter_mut().zip(corners.iter()) {
            *point = (x.round() as i32, y.round() as i32);
        }
        Contour { points }
    }

    pub fn as_f64(&self) -> [(f64, f64); 4] {
        let mut out = [(0.0, 0.0); 4];
        for (o, &(x, y)) in out.iter_mut().zip(self.points.iter()) {
            *o = (x as f64, y as f64);
        }
        out
    }

    /// Centroid of the enclosed polygon, truncated to integers.
    ///
    /// Falls back to the mean of the corners for degenerate (zero-area) contours.
    pub fn center(&self) -> (i32, i32) {
        let m = Moments::of_polygon(&self.as_f64());
        if m.m00.abs() > f64::EPSILON {
            ((m.m10 / m.m00) as i32, (m.m01 / m.m00) as i32)
        } else {
            let (sx, sy) = self
                .points
                .iter()
                .fold((0i64, 0i64), |(sx, sy), &(x, y)| (sx + x as i64, sy + y as i64));
            ((sx / 4) as i32, (sy / 4) as i32)
        }
    }

    /// Axis aligned bounding box as `(min_x, min_y, max_x, max_y)`.
    pub fn bounding_box(&self) -> (i32, i32, i32, i32) {
        self.points.iter().fold(
            (i32::MAX, i32::MAX, i32::MIN, i32::MIN),
            |(min_x, min_y, max_x, max_y), &(x, y)| (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)),
        )
    }
}

/// Corners of an image rectangle in the order top-left, bottom-left, bottom-right,
/// top-right.
pub fn image_corners(shape: ImageShape) -> [(f64, f64); 4] {
    let w = shape.width.saturating_sub(1) as f64;
    let h = shape.height.saturating_sub(1) as f64;
    [(0.0, 0.0), (0.0, h), (w, h), (w, 0.0)]
}

/// Spatial moments up to order three of a closed polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
    pub m30: f64,
    pub m21: f64,
    pub m12: f64,
    pub m03: f64,
}

impl Moments {
    /// Computes the moments of the area enclosed by `points` using Green's theorem.
    ///
    /// The result does not depend on the winding direction.
    pub fn of_polygon(points: &[(f64, f64)]) -> Moments {
        let n = points.len();
        if n == 0 {
            return Moments::default();
        }

        let (mut a00, mut a10, mut a01) = (0.0, 0.0, 0.0);
        let (mut a20, mut a11, mut a02) = (0.0, 0.0, 0.0);
        let (mut a30, mut a21, mut a12, mut a03) = (0.0, 0.0, 0.0, 0.0);

        let (mut xi_1, mut yi_1) = points[n - 1];
        let mut xi_12 = xi_1 * xi_1;
        let mut yi_12 = yi_1 * yi_1;

        for &(xi, yi) in points {
            let xi2 = xi * xi;
            let yi2 = yi * yi;
            let dxy = xi_1 * yi - xi * yi_1;
            let xii_1 = xi_1 + xi;
            let yii_1 = yi_1 + yi;

            a00 += dxy;
            a10 += dxy * xii_1;
            a01 += dxy * yii_1;
            a20 += dxy * (xi_1 * xii_1 + xi2);
            a11 += dxy * (xi_1 * (yii_1 + yi_1) + xi * (yii_1 + yi));
            a02 += dxy * (yi_1 * yii_1 + yi2);
            a30 += dxy * xii_1 * (xi_12 + xi2);
            a03 += dxy * yii_1 * (yi_12 + yi2);
            a21 += dxy * (xi_12 * (3.0 * yi_1 + yi) + 2.0 * xi * xi_1 * yii_1 + xi2 * (yi_1 + 3.0 * yi));
            a12 += dxy * (yi_12 * (3.0 * xi_1 + xi) + 2.0 * yi * yi_1 * xii_1 + yi2 * (xi_1 + 3.0 * xi));

            xi_1 = xi;
            yi_1 = yi;
            xi_12 = xi2;
            yi_12 = yi2;
        }

        if a00.abs() <= f64::EPSILON {
            return Moments::default();
        }

        let sign = if a00 > 0.0 { 1.0 } else { -1.0 };
        Moments {
            m00: a00 * sign / 2.0,
            m10: a10 * sign / 6.0,
            m01: a01 * sign / 6.0,
            m20: a20 * sign / 12.0,
            m11: a11 * sign / 24.0,
            m02: a02 * sign / 12.0,
            m30: a30 * sign / 20.0,
            m21: a21 * sign / 60.0,
            m12: a12 * sign / 60.0,
            m03: a03 * sign / 20.0,
        }
    }

    /// The seven Hu invariants. All zeros for a degenerate polygon.
    pub fn hu(&self) -> [f64; 7] {
        if self.m00.abs() <= f64::EPSILON {
            return [0.0; 7];
        }
        let cx = self.m10 / self.m00;
        let cy = self.m01 / self.m00;

        let mu20 = self.m20 - self.m10 * cx;
        let mu11 = self.m11 - self.m10 * cy;
        let mu02 = self.m02 - self.m01 * cy;
        let mu30 = self.m30 - cx * (3.0 * mu20 + cx * self.m10);
        let mu21 = self.m21 - cx * (2.0 * mu11 + cx * self.m01) - cy * mu20;
        let mu12 = self.m12 - cy * (2.0 * mu11 + cy * self.m10) - cx * mu02;
        let mu03 = self.m03 - cy * (3.0 * mu02 + cy * self.m01);

        // normalized central moments
        let s2 = 1.0 / (self.m00 * self.m00);
        let s3 = s2 / self.m00.abs().sqrt();
        let nu20 = mu20 * s2;
        let nu11 = mu11 * s2;
        let nu02 = mu02 * s2;
        let nu30 = mu30 * s3;
        let nu21 = mu21 * s3;
        let nu12 = mu12 * s3;
        let nu03 = mu03 * s3;

        let mut t0 = nu30 + nu12;
        let mut t1 = nu21 + nu03;
        let mut q0 = t0 * t0;
        let mut q1 = t1 * t1;
        let n4 = 4.0 * nu11;
        let s = nu20 + nu02;
        let d = nu20 - nu02;

        let mut hu = [0.0; 7];
        hu[0] = s;
        hu[1] = d * d + n4 * nu11;
        hu[3] = q0 + q1;
        hu[5] = d * (q0 - q1) + n4 * t0 * t1;

        t0 *= q0 - 3.0 * q1;
        t1 *= 3.0 * q0 - q1;
        q0 = nu30 - 3.0 * nu12;
        q1 = 3.0 * nu21 - nu03;

        hu[2] = q0 * q0 + q1 * q1;
        hu[4] = q0 * t0 + q1 * t1;
        hu[6] = q1 * t0 - q0 * t1;
        hu
    }
}

/// Hu-moment shape distance between two polygons (the I1 metric).
///
/// Each invariant `h` is mapped to `m = sign(h) * log10(|h|)` and the distance sums
/// `|1/m_a - 1/m_b|` over the invariants that are significant in both shapes. Zero means
/// identical shapes up to translation, scale and rotation.
pub fn match_shapes(a: &[(f64, f64)], b: &[(f64, f64)]) -> f64 {
    let ha = Moments::of_polygon(a).hu();
    let hb = Moments::of_polygon(b).hu();

    let mut result = 0.0;
    for (&va, &vb) in ha.iter().zip(hb.iter()) {
        let ama = va.abs();
        let amb = vb.abs();
        if ama > HU_EPSILON && amb > HU_EPSILON {
            let ma = 1.0 / (va.signum() * ama.log10());
            let mb = 1.0 / (vb.signum() * amb.log10());
            result += (mb - ma).abs();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_moments() {
        let rect = [(0.0, 0.0), (0.0, 10.0), (20.0, 10.0), (20.0, 0.0)];
        let m = Moments::of_polygon(&rect);
        assert!((m.m00 - 200.0).abs() < 1e-9);
        assert!((m.m10 / m.m00 - 10.0).abs() < 1e-9);
        assert!((m.m01 / m.m00 - 5.0).abs() < 1e-9);

        let mut reversed = rect;
        reversed.reverse();
        assert_eq!(Moments::of_polygon(&reversed).m00, m.m00);
    }

    #[test]
    fn similar_rectangles_match() {
        let src = image_corners(ImageShape::new(48, 36));
        let moved: Vec<(f64, f64)> = src.iter().map(|&(x, y)| (x * 1.5 + 100.0, y * 1.5 + 40.0)).collect();
        assert!(match_shapes(&src, &moved) < 1e-6);
    }

    #[test]
    fn distorted_quad_does_not_match() {
        let src = image_corners(ImageShape::new(48, 36));
        let skewed = [(0.0, 0.0), (30.0, 35.0), (34.0, 36.0), (47.0, 0.0)];
        assert!(match_shapes(&src, &skewed) > 0.05);
    }

    #[test]
    fn contour_center_and_bounds() {
        let contour = Contour::from_corners(&[(10.2, 20.0), (10.0, 39.6), (49.5, 40.0), (50.0, 20.4)]);
        assert_eq!(contour.points[2], (50, 40));
        assert_eq!(contour.center(), (30, 30));
        assert_eq!(contour.bounding_box(), (10, 20, 50, 40));
    }
}
