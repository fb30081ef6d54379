use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use super::{workgroups_for, GpuContext};
use crate::circular_feature_descriptor::DESCRIPTOR_DIMS;
use crate::circular_feature_descriptor_matcher::{passes_ratio_test, Correspondence};
use crate::contour::Contour;
use crate::error::Result;
use crate::feature_matcher::{eliminate_regions, FeatureMatcher, MatcherParams};
use crate::feature_set::FeatureArray;
use crate::photo::ImageShape;

const KNN_SHADER: &str = include_str!("shaders/knn.wgsl");
const WORKGROUP_SIZE: usize = 64;
/// Distance the shader reports when fewer than two live neighbours exist.
const NO_NEIGHBOUR: f32 = 1e30;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct KnnParams {
    num_src: u32,
    num_dst: u32,
    dims: u32,
    _padding: u32,
}

/// Region elimination matcher with the nearest neighbour search on the GPU.
///
/// See [`eliminate_regions`] for the loop itself.
pub struct GpuFeatureMatcher {
    context: Rc<GpuContext>,
    params: MatcherParams,
    pipeline: wgpu::ComputePipeline,
}

impl GpuFeatureMatcher {
    pub fn new(context: Rc<GpuContext>, params: MatcherParams) -> Self {
        let pipeline = context.create_compute_pipeline("two nearest neighbours", KNN_SHADER);
        GpuFeatureMatcher {
            context,
            params,
            pipeline,
        }
    }
}

impl FeatureMatcher for GpuFeatureMatcher {
    type Features = FeatureArray;

    fn get_match_contours(&mut self, src_shape: ImageShape, src: &FeatureArray, dst: &FeatureArray) -> Result<Vec<Contour>> {
        if src.rows == 0 || dst.rows < 2 {
            return Ok(Vec::new());
        }
        let context = &self.context;
        let src_buffer = context.storage_buffer("source descriptors", bytemuck::cast_slice(&descriptor_matrix(src)));
        let dst_buffer = context.storage_buffer("destination descriptors", bytemuck::cast_slice(&descriptor_matrix(dst)));
        let output = context.output_buffer("neighbours", (src.rows * 4 * 4) as u64);
        let knn_params = KnnParams {
            num_src: src.rows as u32,
            num_dst: dst.rows as u32,
            dims: DESCRIPTOR_DIMS as u32,
            _padding: 0,
        };
        let knn_params = context.uniform_buffer("knn params", bytemuck::bytes_of(&knn_params));
        let ratio = self.params.ratio_threshold;

        eliminate_regions(src_shape, src, dst, &self.params, |alive| {
            let mask: Vec<u32> = alive.iter().map(|&live| live as u32).collect();
            let mask = context.storage_buffer("live destinations", bytemuck::cast_slice(&mask));
            context.dispatch(
                &self.pipeline,
                &[&src_buffer, &dst_buffer, &mask, &output, &knn_params],
                workgroups_for(src.rows, WORKGROUP_SIZE),
            );
            Ok(ratio_filter(&context.read_f32(&output)?, ratio))
        })
    }
}

fn descriptor_matrix(features: &FeatureArray) -> Vec<f32> {
    (0..features.rows).flat_map(|i| features.descriptor(i).iter().copied()).collect()
}

/// Turns raw `(index, best d^2, second d^2, _)` shader rows into ratio-tested correspondences.
fn ratio_filter(raw: &[f32], ratio: f32) -> Vec<Correspondence> {
    raw.chunks_exact(4)
        .enumerate()
        .filter_map(|(src, row)| {
            let (index, best, second) = (row[0], row[1], row[2]);
            if index < 0.0 || second >= NO_NEIGHBOUR {
                return None;
            }
            passes_ratio_test(best as f64, second as f64, ratio).then_some(Correspondence {
                src,
                dst: index as usize,
            })
        })
        .collect()
}
