use log::debug;
use serde::{Deserialize, Serialize};

use crate::circular_feature_descriptor_matcher::{CircularFeatureDescriptorMatcher, Correspondence};
use crate::contour::{image_corners, match_shapes, Contour};
use crate::error::Result;
use crate::feature_set::{FeatureArray, FeatureSet};
use crate::homography::{find_homography_ransac, RansacEstimate, RansacParams, MIN_CORRESPONDENCES};
use crate::photo::ImageShape;

/// Thresholds of the match-and-eliminate loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    /// Lowe ratio between the best and the second best descriptor distance.
    pub ratio_threshold: f32,
    /// RANSAC inlier distance in destination pixels.
    pub ransac_threshold: f64,
    /// Largest accepted Hu-moment distance between the source rectangle and its projection.
    pub shape_threshold: f64,
    /// Fewest RANSAC inliers an accepted homography may have.
    pub min_inliers: usize,
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl MatcherParams {
    pub fn cpu_default() -> Self {
        MatcherParams {
            ratio_threshold: 0.6,
            ransac_threshold: 35.0,
            shape_threshold: 0.05,
            min_inliers: 8,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0,
        }
    }

    pub fn gpu_default() -> Self {
        MatcherParams {
            ratio_threshold: 0.75,
            ransac_threshold: 5.0,
            shape_threshold: 0.03,
            ..MatcherParams::cpu_default()
        }
    }

    /// RANSAC settings for elimination round `round`. Each round gets its own seed.
    pub fn ransac(&self, round: usize) -> RansacParams {
        RansacParams {
            threshold: self.ransac_threshold,
            max_iterations: self.max_iterations,
            confidence: self.confidence,
            seed: self.seed.wrapping_add(round as u64),
        }
    }
}

impl Default for MatcherParams {
    fn default() -> Self {
        MatcherParams::cpu_default()
    }
}

/// Locates a source image inside a destination image, possibly several times.
pub trait FeatureMatcher {
    type Features;

    /// Destination quadrilaterals the source image's boundary maps to. An empty list is a
    /// normal outcome.
    fn get_match_contours(
        &mut self,
        src_shape: ImageShape,
        src_features: &Self::Features,
        dst_features: &Self::Features,
    ) -> Result<Vec<Contour>>;
}

/// Projects the source rectangle through `estimate` and keeps the quadrilateral when it is
/// still rectangle shaped and supported by enough inliers.
pub fn accept_candidate(src_shape: ImageShape, estimate: &RansacEstimate, params: &MatcherParams) -> Option<Contour> {
    let corners = image_corners(src_shape);
    let projected = estimate.homography.transform_corners(&corners)?;
    let contour = Contour::from_corners(&projected);
    let score = match_shapes(&corners, &contour.as_f64());
    let inliers = estimate.num_inliers();
    if score < params.shape_threshold && inliers >= params.min_inliers {
        debug!("Accepted contour {:?} (shape {score:.4}, {inliers} inliers)", contour.points);
        Some(contour)
    } else {
        debug!("Rejected candidate (shape {score:.4}, {inliers} inliers)");
        None
    }
}

/// Iterative homography matching over a fixed correspondence pool.
///
/// Each round fits a homography to the remaining correspondences, records the projected
/// source rectangle if it passes [`accept_candidate`], and removes the round's inliers.
pub struct CpuFeatureMatcher {
    params: MatcherParams,
    descriptor_matcher: CircularFeatureDescriptorMatcher,
}

impl CpuFeatureMatcher {
    pub fn new(params: MatcherParams) -> Self {
        let descriptor_matcher = CircularFeatureDescriptorMatcher::new(params.ratio_threshold);
        CpuFeatureMatcher {
            params,
            descriptor_matcher,
        }
    }
}

impl FeatureMatcher for CpuFeatureMatcher {
    type Features = FeatureSet;

    fn get_match_contours(&mut self, src_shape: ImageShape, src: &FeatureSet, dst: &FeatureSet) -> Result<Vec<Contour>> {
        let correspondences = self.descriptor_matcher.match_descriptors(&src.descriptors, &dst.descriptors);
        Ok(eliminate(src_shape, src, dst, correspondences, &self.params))
    }
}

fn eliminate(
    src_shape: ImageShape,
    src: &FeatureSet,
    dst: &FeatureSet,
    mut pool: Vec<Correspondence>,
    params: &MatcherParams,
) -> Vec<Contour> {
    let mut contours = Vec::new();
    let mut round = 0;
    while pool.len() >= MIN_CORRESPONDENCES {
        let src_pts: Vec<(f64, f64)> = pool.iter().map(|c| keypoint_point(src, c.src)).collect();
        let dst_pts: Vec<(f64, f64)> = pool.iter().map(|c| keypoint_point(dst, c.dst)).collect();
        let Some(estimate) = find_homography_ransac(&src_pts, &dst_pts, &params.ransac(round)) else {
            break;
        };
        if let Some(contour) = accept_candidate(src_shape, &estimate, params) {
            contours.push(contour);
        }

        let before = pool.len();
        let mut inliers = estimate.inliers.iter();
        pool.retain(|_| !inliers.next().copied().unwrap_or(false));
        if pool.len() == before {
            break;
        }
        round += 1;
    }
    contours
}

fn keypoint_point(features: &FeatureSet, index: usize) -> (f64, f64) {
    let k = &features.keypoints[index];
    (k.x as f64, k.y as f64)
}

/// Iterative matching that re-runs the nearest neighbour search every round.
///
/// `knn` receives the liveness mask of the destination keypoints and returns ratio-tested
/// correspondences against the live ones. After each round every destination keypoint
/// strictly inside the bounding box of the projected source rectangle is removed, together
/// with the round's inliers, whether or not the candidate was accepted. The loop ends when
/// fewer than four correspondences remain or a round removes nothing.
pub fn eliminate_regions(
    src_shape: ImageShape,
    src: &FeatureArray,
    dst: &FeatureArray,
    params: &MatcherParams,
    mut knn: impl FnMut(&[bool]) -> Result<Vec<Correspondence>>,
) -> Result<Vec<Contour>> {
    let corners = image_corners(src_shape);
    let mut alive = vec![true; dst.rows];
    let mut contours = Vec::new();
    let mut round = 0;
    loop {
        let correspondences = knn(&alive)?;
        if correspondences.len() < MIN_CORRESPONDENCES {
            break;
        }
        let src_pts: Vec<(f64, f64)> = correspondences.iter().map(|c| src.point(c.src)).collect();
        let dst_pts: Vec<(f64, f64)> = correspondences.iter().map(|c| dst.point(c.dst)).collect();
        let Some(estimate) = find_homography_ransac(&src_pts, &dst_pts, &params.ransac(round)) else {
            break;
        };
        if let Some(contour) = accept_candidate(src_shape, &estimate, params) {
            contours.push(contour);
        }

        let mut removed = 0;
        if let Some(projected) = estimate.homography.transform_corners(&corners) {
            let (min_x, max_x) = min_max(projected.iter().map(|p| p.0));
            let (min_y, max_y) = min_max(projected.iter().map(|p| p.1));
            for (index, live) in alive.iter_mut().enumerate() {
                let (x, y) = dst.point(index);
                if *live && x > min_x && x < max_x && y > min_y && y < max_y {
                    *live = false;
                    removed += 1;
                }
            }
        }
        for (c, &inlier) in correspondences.iter().zip(estimate.inliers.iter()) {
            if inlier && alive[c.dst] {
                alive[c.dst] = false;
                removed += 1;
            }
        }
        debug!("Round {round}: removed {removed} destination keypoints");
        if removed == 0 {
            break;
        }
        round += 1;
    }
    Ok(contours)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}
