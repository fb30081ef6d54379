use crate::circular_feature_descriptor::{CircularFeatureDescriptor, DESCRIPTOR_DIMS};
use kd_tree::{KdPoint, KdTree};

/// A descriptor's quantized vector tagged with its position in the feature set.
#[derive(Debug, Clone, Copy)]
pub struct IndexedDescriptor {
    pub index: usize,
    pub feature_vector: [i64; DESCRIPTOR_DIMS],
}

impl KdPoint for IndexedDescriptor {
    type Scalar = i64;
    type Dim = typenum::U12;
    fn at(&self, k: usize) -> i64 {
        self.feature_vector[k]
    }
}

/// A tentative match between source keypoint `src` and destination keypoint `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correspondence {
    pub src: usize,
    pub dst: usize,
}

/// Accepts a nearest neighbour only when it is clearly closer than the runner-up:
/// `best < ratio * second` on Euclidean distances.
pub fn passes_ratio_test(best_squared: f64, second_squared: f64, ratio: f32) -> bool {
    let ratio = ratio as f64;
    best_squared < ratio * ratio * second_squared
}

/// Provides a way to match circular feature descriptors between two images.
///
/// This struct uses a [KdTree] (built from the `kd_tree` crate) over the destination
/// descriptors and looks up the two nearest neighbours of every source descriptor. Pairs
/// that fail the ratio test are ambiguous and dropped.
pub struct CircularFeatureDescriptorMatcher {
    ratio_threshold: f32,
}

impl CircularFeatureDescriptorMatcher {
    pub fn new(ratio_threshold: f32) -> Self {
        CircularFeatureDescriptorMatcher { ratio_threshold }
    }

    /// Matches `src` against `dst`, at most one correspondence per source descriptor,
    /// in source order.
    pub fn match_descriptors(
        &self,
        src: &[CircularFeatureDescriptor],
        dst: &[CircularFeatureDescriptor],
    ) -> Vec<Correspondence> {
        if src.is_empty() || dst.len() < 2 {
            return Vec::new();
        }

        let kdtree = KdTree::build(
            dst.iter()
                .enumerate()
                .map(|(index, d)| IndexedDescriptor {
                    index,
                    feature_vector: d.feature_vector,
                })
                .collect::<Vec<_>>(),
        );

        let mut ans = Vec::new();
        for (index, d) in src.iter().enumerate() {
            let query = IndexedDescriptor {
                index,
                feature_vector: d.feature_vector,
            };
            let nearests = kdtree.nearests(&query, 2);
            if nearests.len() < 2 {
                continue;
            }
            let best = nearests[0].squared_distance as f64;
            let second = nearests[1].squared_distance as f64;
            if passes_ratio_test(best, second, self.ratio_threshold) {
                ans.push(Correspondence {
                    src: index,
                    dst: nearests[0].item.index,
                });
            }
        }
        ans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(seed: f32) -> CircularFeatureDescriptor {
        let mut aligned = [0.0f32; DESCRIPTOR_DIMS];
        for (i, a) in aligned.iter_mut().enumerate() {
            *a = ((seed * 7.3 + i as f32 * 1.7).sin()) * 0.3;
        }
        CircularFeatureDescriptor::from_aligned(0.0, 0.1, aligned)
    }

    #[test]
    fn identical_descriptors_match() {
        let dst: Vec<_> = (0..20).map(|i| descriptor(i as f32)).collect();
        let src = vec![dst[4], dst[13]];
        let matches = CircularFeatureDescriptorMatcher::new(0.6).match_descriptors(&src, &dst);
        assert_eq!(
            matches,
            vec![Correspondence { src: 0, dst: 4 }, Correspondence { src: 1, dst: 13 }]
        );
    }

    #[test]
    fn ambiguous_match_is_dropped() {
        let a = descriptor(1.0);
        let dst = vec![a, a, descriptor(5.0)];
        let matches = CircularFeatureDescriptorMatcher::new(0.75).match_descriptors(&[a], &dst);
        assert!(matches.is_empty());
    }

    #[test]
    fn ratio_test() {
        assert!(passes_ratio_test(0.0, 1.0, 0.6));
        assert!(!passes_ratio_test(0.0, 0.0, 0.6));
        assert!(!passes_ratio_test(0.5, 1.0, 0.6));
    }
}
