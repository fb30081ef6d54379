use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Minimum number of correspondences needed to define a homography.
pub const MIN_CORRESPONDENCES: usize = 4;

/// A planar projective transform stored as a 3x3 matrix with `h[(2, 2)] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

/// Tuning for [`find_homography_ransac`].
#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// Maximum reprojection distance (in destination pixels) for a point to count as an inlier.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Desired probability that at least one sample is outlier free.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        RansacParams {
            threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0,
        }
    }
}

/// A robustly estimated homography and the per-correspondence inlier mask.
#[derive(Debug, Clone)]
pub struct RansacEstimate {
    pub homography: Homography,
    pub inliers: Vec<bool>,
}

impl RansacEstimate {
    pub fn num_inliers(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }
}

impl Homography {
    pub fn identity() -> Self {
        Homography { h: Matrix3::identity() }
    }

    /// Least squares fit of the homography mapping `src[i]` onto `dst[i]` with the
    /// normalized direct linear transform.
    ///
    /// Returns `None` for fewer than four pairs or a degenerate configuration.
    pub fn fit(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Homography> {
        let n = src.len();
        if n < MIN_CORRESPONDENCES || dst.len() != n {
            return None;
        }
        let t_src = normalizing_transform(src)?;
        let t_dst = normalizing_transform(dst)?;

        // The SVD of an 8x9 system drops the null vector, so pad to at least 9 rows.
        let rows = (2 * n).max(9);
        let mut data = vec![0.0f64; rows * 9];
        for (i, (&s, &d)) in src.iter().zip(dst.iter()).enumerate() {
            let (x, y) = apply_affine(&t_src, s);
            let (u, v) = apply_affine(&t_dst, d);
            let r1 = &mut data[(2 * i) * 9..(2 * i + 1) * 9];
            r1.copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
            let r2 = &mut data[(2 * i + 1) * 9..(2 * i + 2) * 9];
            r2.copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        }

        let a = DMatrix::from_row_slice(rows, 9, &data);
        let svd = a.svd(false, true);
        let v_t = svd.v_t?;
        let (min_index, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;

        let row = v_t.row(min_index);
        let h_norm = Matrix3::new(row[0], row[1], row[2], row[3], row[4], row[5], row[6], row[7], row[8]);
        let h = t_dst.try_inverse()? * h_norm * t_src;

        let scale = h[(2, 2)];
        if scale.abs() < 1e-12 {
            return None;
        }
        let h = h / scale;
        if h.iter().any(|v| !v.is_finite()) || h.determinant().abs() < 1e-12 {
            return None;
        }
        Some(Homography { h })
    }

    /// Maps a point through the homography, or `None` when it lands at infinity.
    pub fn apply(&self, (x, y): (f64, f64)) -> Option<(f64, f64)> {
        let p = self.h * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }

    /// Euclidean distance between the projection of `src` and `dst`.
    pub fn reprojection_error(&self, src: (f64, f64), dst: (f64, f64)) -> f64 {
        match self.apply(src) {
            Some((x, y)) => ((x - dst.0).powi(2) + (y - dst.1).powi(2)).sqrt(),
            None => f64::INFINITY,
        }
    }

    /// Transforms the four corners of a quadrilateral.
    pub fn transform_corners(&self, corners: &[(f64, f64); 4]) -> Option<[(f64, f64); 4]> {
        let mut out = [(0.0, 0.0); 4];
        for (o, &c) in out.iter_mut().zip(corners.iter()) {
            *o = self.apply(c)?;
        }
        Some(out)
    }

    fn inlier_mask(&self, src: &[(f64, f64)], dst: &[(f64, f64)], threshold: f64) -> Vec<bool> {
        src.iter()
            .zip(dst.iter())
            .map(|(&s, &d)| self.reprojection_error(s, d) <= threshold)
            .collect()
    }
}

/// Robust homography estimation.
///
/// Minimal four-point samples are drawn from a seeded generator, so results are
/// reproducible. The iteration count adapts to the best inlier ratio seen so far. The
/// winning model is refit by least squares on its inliers and the inlier mask recomputed.
///
/// Returns `None` when fewer than four pairs are given or no sample yields a model.
pub fn find_homography_ransac(src: &[(f64, f64)], dst: &[(f64, f64)], params: &RansacParams) -> Option<RansacEstimate> {
    let n = src.len();
    if n < MIN_CORRESPONDENCES || dst.len() != n {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut max_iterations = params.max_iterations;
    let mut iteration = 0;

    while iteration < max_iterations {
        iteration += 1;
        let sample = rand::seq::index::sample(&mut rng, n, MIN_CORRESPONDENCES).into_vec();
        let s: Vec<(f64, f64)> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<(f64, f64)> = sample.iter().map(|&i| dst[i]).collect();
        if is_degenerate(&s) || is_degenerate(&d) {
            continue;
        }
        let Some(model) = Homography::fit(&s, &d) else {
            continue;
        };

        let mask = model.inlier_mask(src, dst, params.threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().map_or(true, |(_, _, best_count)| count > *best_count) {
            max_iterations = max_iterations.min(adaptive_iterations(count, n, params.confidence, params.max_iterations));
            best = Some((model, mask, count));
        }
    }

    let (model, mask, count) = best?;
    if count < MIN_CORRESPONDENCES {
        return Some(RansacEstimate {
            homography: model,
            inliers: mask,
        });
    }

    // refine on the consensus set
    let inlier_src: Vec<(f64, f64)> = src.iter().zip(&mask).filter(|&(_, &m)| m).map(|(&p, _)| p).collect();
    let inlier_dst: Vec<(f64, f64)> = dst.iter().zip(&mask).filter(|&(_, &m)| m).map(|(&p, _)| p).collect();
    if let Some(refined) = Homography::fit(&inlier_src, &inlier_dst) {
        let refined_mask = refined.inlier_mask(src, dst, params.threshold);
        if refined_mask.iter().filter(|&&m| m).count() >= count {
            return Some(RansacEstimate {
                homography: refined,
                inliers: refined_mask,
            });
        }
    }
    Some(RansacEstimate {
        homography: model,
        inliers: mask,
    })
}

fn adaptive_iterations(inliers: usize, total: usize, confidence: f64, max_iterations: usize) -> usize {
    let ratio = inliers as f64 / total as f64;
    let p_good = ratio.powi(MIN_CORRESPONDENCES as i32);
    if p_good >= 1.0 {
        return 0;
    }
    if p_good <= 0.0 {
        return max_iterations;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if k.is_finite() {
        (k.ceil() as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

/// Three of the sample points (nearly) on one line.
fn is_degenerate(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (ax, ay) = points[i];
                let (bx, by) = points[j];
                let (cx, cy) = points[k];
                let cross = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
                if cross.abs() < 1e-3 {
                    return true;
                }
            }
        }
    }
    false
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2).
fn normalizing_transform(points: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply_affine(t: &Matrix3<f64>, (x, y): (f64, f64)) -> (f64, f64) {
    (t[(0, 0)] * x + t[(0, 2)], t[(1, 1)] * y + t[(1, 2)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points() -> Vec<(f64, f64)> {
        let mut pts = Vec::new();
        for y in 0..4 {
            for x in 0..5 {
                pts.push((x as f64 * 10.0 + (y as f64) * 0.7, y as f64 * 9.0 + (x as f64) * 0.3));
            }
        }
        pts
    }

    #[test]
    fn fits_scale_and_translation() {
        let src = grid_points();
        let dst: Vec<(f64, f64)> = src.iter().map(|&(x, y)| (2.0 * x + 30.0, 2.0 * y - 7.0)).collect();
        let h = Homography::fit(&src, &dst).unwrap();
        let (x, y) = h.apply((11.0, 13.0)).unwrap();
        assert!((x - 52.0).abs() < 1e-6);
        assert!((y - 19.0).abs() < 1e-6);
    }

    #[test]
    fn ransac_rejects_outliers() {
        let src = grid_points();
        let mut dst: Vec<(f64, f64)> = src.iter().map(|&(x, y)| (x + 100.0, y + 50.0)).collect();
        dst[3] = (500.0, 3.0);
        dst[11] = (-40.0, 250.0);

        let estimate = find_homography_ransac(&src, &dst, &RansacParams::default()).unwrap();
        assert_eq!(estimate.num_inliers(), src.len() - 2);
        assert!(!estimate.inliers[3]);
        assert!(!estimate.inliers[11]);
        let (x, y) = estimate.homography.apply((1.0, 2.0)).unwrap();
        assert!((x - 101.0).abs() < 1e-6 && (y - 52.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_points() {
        let src = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
        assert!(Homography::fit(&src, &src).is_none());
        assert!(find_homography_ransac(&src, &src, &RansacParams::default()).is_none());
    }
}
