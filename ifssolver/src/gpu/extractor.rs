use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use log::debug;

use super::{workgroups_for, GpuContext};
use crate::circular_feature_descriptor::{DiskTable, DESCRIPTOR_DIMS};
use crate::error::Result;
use crate::feature_extractor::{ExtractionPlan, ExtractorParams, FeatureExtractor};
use crate::feature_set::{FeatureArray, FEATURE_COLS};
use crate::keypoint_detector::Corner;
use crate::photo::Photo;
use crate::plan_cache::{PlanCache, PlanKey};

const DESCRIPTOR_SHADER: &str = include_str!("shaders/descriptor.wgsl");
const OUTPUT_COLS: usize = 2 + DESCRIPTOR_DIMS;
const WORKGROUP_SIZE: usize = 64;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct DescriptorParams {
    width: u32,
    height: u32,
    num_keypoints: u32,
    outer_radius: i32,
    inner_radius: i32,
    _padding: [u32; 3],
}

/// Extraction plan plus the device buffers sized for one image shape.
struct GpuPlan {
    plan: ExtractionPlan,
    disk: wgpu::Buffer,
    level_pixels: Vec<wgpu::Buffer>,
}

impl GpuPlan {
    fn new(context: &GpuContext, key: &PlanKey, params: &ExtractorParams) -> GpuPlan {
        let plan = ExtractionPlan::new(key, params);
        let extents: Vec<i32> = disk_extents(&plan.outer).chain(disk_extents(&plan.inner)).collect();
        let disk = context.storage_buffer("disk extents", bytemuck::cast_slice(&extents));
        let level_pixels = plan
            .levels
            .iter()
            .map(|level| {
                context.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("level pixels"),
                    size: (level.width * level.height * 4) as u64,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        GpuPlan {
            plan,
            disk,
            level_pixels,
        }
    }
}

fn disk_extents(table: &DiskTable) -> impl Iterator<Item = i32> + '_ {
    let radius = table.radius() as isize;
    (-radius..=radius).map(move |dy| table.row_extent(dy).unwrap_or(0) as i32)
}

/// Computes the circular colour descriptors in a compute shader.
///
/// Keypoint selection is shared with [`CpuFeatureExtractor`](crate::feature_extractor::CpuFeatureExtractor),
/// so both backends describe the same keypoints. Features are returned packed.
pub struct GpuFeatureExtractor {
    context: Rc<GpuContext>,
    params: ExtractorParams,
    enable_cache: bool,
    pipeline: wgpu::ComputePipeline,
    plans: PlanCache<GpuPlan>,
    total_extractions: usize,
}

impl GpuFeatureExtractor {
    pub fn new(context: Rc<GpuContext>, params: ExtractorParams, enable_cache: bool) -> Self {
        let pipeline = context.create_compute_pipeline("circular descriptor", DESCRIPTOR_SHADER);
        let plans = PlanCache::new(params.plan_cache_capacity);
        GpuFeatureExtractor {
            context,
            params,
            enable_cache,
            pipeline,
            plans,
            total_extractions: 0,
        }
    }

    pub fn get_num_extractions(&self) -> usize {
        self.total_extractions
    }

    /// Descriptor rows (`OUTPUT_COLS` values each) of `corners` on pyramid level `octave`.
    fn describe(&self, plan: &GpuPlan, octave: usize, level: &Photo, corners: &[Corner]) -> Result<Vec<f32>> {
        let context = &self.context;
        let pixels = &plan.level_pixels[octave];
        context.queue.write_buffer(pixels, 0, &level.img_data);

        let keypoints: Vec<[u32; 2]> = corners.iter().map(|c| [c.x as u32, c.y as u32]).collect();
        let keypoints = context.storage_buffer("keypoints", bytemuck::cast_slice(&keypoints));
        let output = context.output_buffer("descriptors", (corners.len() * OUTPUT_COLS * 4) as u64);
        let params = DescriptorParams {
            width: level.width as u32,
            height: level.height as u32,
            num_keypoints: corners.len() as u32,
            outer_radius: plan.plan.outer.radius() as i32,
            inner_radius: plan.plan.inner.radius() as i32,
            _padding: [0; 3],
        };
        let params = context.uniform_buffer("descriptor params", bytemuck::bytes_of(&params));

        context.dispatch(
            &self.pipeline,
            &[pixels, &keypoints, &plan.disk, &output, &params],
            workgroups_for(corners.len(), WORKGROUP_SIZE),
        );
        context.read_f32(&output)
    }
}

impl FeatureExtractor for GpuFeatureExtractor {
    type Features = FeatureArray;

    fn method(&self) -> &'static str {
        "gpu"
    }

    fn cache_enabled(&self) -> bool {
        self.enable_cache
    }

    fn params(&self) -> &ExtractorParams {
        &self.params
    }

    fn extract(&mut self, photo: &Photo, max_keypoints: Option<usize>) -> Result<FeatureArray> {
        let context = Rc::clone(&self.context);
        let params = &self.params;
        let plan = self
            .plans
            .get_or_build(PlanKey::rgba(photo.shape()), |key| Ok(GpuPlan::new(&context, key, params)))?;
        self.total_extractions += 1;

        let pyramid = plan.plan.pyramid(photo);
        let selected = plan.plan.select_corners(&pyramid, self.params.fast_threshold, max_keypoints);
        let outer_size = 2.0 * plan.plan.outer.radius() as f32;

        let mut data = Vec::with_capacity(selected.len() * FEATURE_COLS);
        for (octave, level) in pyramid.iter().enumerate() {
            let corners: Vec<Corner> = selected.iter().filter(|(o, _)| *o == octave).map(|(_, c)| *c).collect();
            if corners.is_empty() {
                continue;
            }
            let rows = self.describe(&plan, octave, level, &corners)?;
            let scale = plan.plan.levels[octave].scale;
            for (corner, row) in corners.iter().zip(rows.chunks_exact(OUTPUT_COLS)) {
                data.extend_from_slice(&[
                    corner.x as f32 * scale,
                    corner.y as f32 * scale,
                    row[0],
                    corner.score,
                    octave as f32,
                    outer_size * scale,
                    row[1],
                ]);
                data.extend_from_slice(&row[2..]);
            }
        }

        let features = FeatureArray {
            rows: data.len() / FEATURE_COLS,
            cols: FEATURE_COLS,
            data,
        };
        debug!("Extracted {} keypoints from {}x{} image", features.rows, photo.width, photo.height);
        Ok(features)
    }

    fn pack(features: &FeatureArray) -> FeatureArray {
        features.clone()
    }

    fn unpack(array: FeatureArray) -> std::result::Result<FeatureArray, String> {
        array.validate()?;
        Ok(array)
    }
}
