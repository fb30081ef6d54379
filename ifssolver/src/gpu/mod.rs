//! wgpu compute backend.
//!
//! Keypoints come from the same FAST detector as the CPU backend. Descriptors and the
//! two-nearest-neighbour search run as compute shaders, and features stay in the packed
//! [`FeatureArray`](crate::feature_set::FeatureArray) layout end to end.

mod extractor;
mod matcher;

pub use extractor::GpuFeatureExtractor;
pub use matcher::GpuFeatureMatcher;

use std::sync::mpsc;

use log::info;
use wgpu::util::DeviceExt;

use crate::config::PowerPreference;
use crate::error::{Result, SolverError};

/// Device and queue shared by the GPU extractor and matcher.
#[derive(Debug)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Opens the first adapter matching `power_preference`.
    ///
    /// # Errors
    /// [`SolverError::Gpu`] when no adapter or device is available.
    pub fn new(power_preference: PowerPreference) -> Result<GpuContext> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: match power_preference {
                PowerPreference::None => wgpu::PowerPreference::None,
                PowerPreference::Low => wgpu::PowerPreference::LowPower,
                PowerPreference::High => wgpu::PowerPreference::HighPerformance,
            },
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| SolverError::Gpu(format!("no adapter: {e}")))?;
        info!("Using GPU adapter {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("ifssolver"),
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Default::default()
        }))
        .map_err(|e| SolverError::Gpu(format!("no device: {e}")))?;

        Ok(GpuContext { device, queue })
    }

    pub(crate) fn create_compute_pipeline(&self, label: &str, shader_source: &str) -> wgpu::ComputePipeline {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });
        self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        })
    }

    pub(crate) fn storage_buffer(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        })
    }

    pub(crate) fn uniform_buffer(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    pub(crate) fn output_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Binds `buffers` to group 0 in order and runs `workgroups` groups of the pipeline.
    pub(crate) fn dispatch(&self, pipeline: &wgpu::ComputePipeline, buffers: &[&wgpu::Buffer], workgroups: u32) {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Copies a storage buffer back to the host.
    pub(crate) fn read_f32(&self, buffer: &wgpu::Buffer) -> Result<Vec<f32>> {
        let size = buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| SolverError::Gpu(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| SolverError::Gpu(e.to_string()))?
            .map_err(|e| SolverError::Gpu(e.to_string()))?;

        let values = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&data).to_vec()
        };
        staging.unmap();
        Ok(values)
    }
}

pub(crate) fn workgroups_for(items: usize, workgroup_size: usize) -> u32 {
    items.div_ceil(workgroup_size) as u32
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::GpuContext;
    use crate::config::PowerPreference;

    /// A context, or `None` on machines without a usable adapter.
    pub fn context() -> Option<GpuContext> {
        match GpuContext::new(PowerPreference::default()) {
            Ok(context) => Some(context),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }
}
