//! GPU compute host using wgpu

use super::{BufferDesc, BufferKind, ComputeBackend, KernelDispatch};
use crate::core::{Error, Result};

/// WGSL declarations matching the kernel binding layout
///
/// Prepend to a kernel body that defines the entry point:
///
/// ```ignore
/// let source = format!("{}{}", voxmesh::compute::gpu::KERNEL_PRELUDE, include_str!("mc.wgsl"));
/// let backend = GpuBackend::new(&ctx.device, &ctx.queue, &source, "main");
/// ```
pub const KERNEL_PRELUDE: &str = r#"
struct Sample {
    distance: f32,
    color: array<f32, 3>,
}

struct Triangle {
    a: vec4<f32>,
    b: vec4<f32>,
    c: vec4<f32>,
    color: vec4<f32>,
}

struct Params {
    dims: vec3<u32>,
    max_triangles: u32,
}

@group(0) @binding(0) var<storage, read> samples: array<Sample>;
@group(0) @binding(1) var<storage, read_write> triangles: array<Triangle>;
@group(0) @binding(2) var<storage, read_write> triangle_count: atomic<u32>;
@group(0) @binding(3) var<uniform> params: Params;
"#;

/// Headless GPU context (no surface), for offline meshing
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Request an adapter and device without a window
    pub async fn new_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("No suitable adapter found: {:?}", e)))?;

        let adapter_limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("voxmesh_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits {
                    max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                    max_buffer_size: adapter_limits.max_buffer_size,
                    ..Default::default()
                },
                memory_hints: wgpu::MemoryHints::Performance,
                experimental_features: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        log::info!(
            "GPU buffer limits: max_buffer_size={}MB, max_storage_binding={}MB",
            adapter_limits.max_buffer_size / 1024 / 1024,
            adapter_limits.max_storage_buffer_binding_size / 1024 / 1024
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Blocking form of [`GpuContext::new_headless`]
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::new_headless())
    }

    /// Build a backend for a kernel on this context's device
    pub fn backend(&self, kernel_wgsl: &str, entry_point: &str) -> GpuBackend {
        GpuBackend::new(&self.device, &self.queue, kernel_wgsl, entry_point)
    }
}

/// Device buffer plus the bookkeeping needed for bounds checks
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl GpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Requested size in bytes (the device buffer may be padded)
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Usage flags per buffer role
fn usage_for(kind: BufferKind) -> wgpu::BufferUsages {
    match kind {
        BufferKind::Samples | BufferKind::Triangles | BufferKind::Counter => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
        }
        BufferKind::Params => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    }
}

/// Round a byte size up to the copy alignment; bindings cannot be empty
fn padded_size(size: u64) -> u64 {
    size.max(wgpu::COPY_BUFFER_ALIGNMENT).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Runs a WGSL surface-extraction kernel
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuBackend {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, kernel_wgsl: &str, entry_point: &str) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mesh_kernel_shader"),
            source: wgpu::ShaderSource::Wgsl(kernel_wgsl.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mesh_kernel_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mesh_kernel_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("mesh_kernel_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            device: device.clone(),
            queue: queue.clone(),
            pipeline,
            bind_group_layout,
        }
    }

    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|e| Error::Gpu(e.to_string()))?;
        Ok(())
    }

    fn check_range(buffer: &GpuBuffer, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= buffer.size => Ok(()),
            _ => Err(Error::Gpu(format!(
                "access of {} bytes at offset {} exceeds buffer of {} bytes",
                len, offset, buffer.size
            ))),
        }
    }
}

impl ComputeBackend for GpuBackend {
    type Buffer = GpuBuffer;

    fn allocate(&self, desc: &BufferDesc) -> Result<GpuBuffer> {
        let limits = self.device.limits();
        let size = padded_size(desc.size);
        let max = match desc.kind {
            BufferKind::Params => u64::from(limits.max_uniform_buffer_binding_size),
            _ => u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size),
        };
        if size > max {
            log::warn!(
                "Buffer '{}' needs {} bytes, device allows {}",
                desc.label,
                size,
                max
            );
            return Err(Error::BufferAllocation {
                label: desc.label,
                size: desc.size,
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: usage_for(desc.kind),
            mapped_at_creation: false,
        });

        Ok(GpuBuffer {
            buffer,
            size: desc.size,
        })
    }

    fn upload(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        Self::check_range(buffer, offset, data.len() as u64)?;
        self.queue.write_buffer(&buffer.buffer, offset, data);
        Ok(())
    }

    fn dispatch(&self, dispatch: &KernelDispatch<'_, GpuBuffer>) -> Result<()> {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mesh_kernel_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dispatch.samples.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dispatch.triangles.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dispatch.counter.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dispatch.params.buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mesh_kernel_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("mesh_kernel_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let [x, y, z] = dispatch.workgroups;
            pass.dispatch_workgroups(x, y, z);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.wait()
    }

    fn read(&self, buffer: &GpuBuffer, offset: u64, len: u64) -> Result<Vec<u8>> {
        Self::check_range(buffer, offset, len)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(Error::Gpu(format!("readback offset {} is not 4-byte aligned", offset)));
        }

        let copy_size = padded_size(len);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh_readback_staging"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mesh_readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(&buffer.buffer, offset, &staging, 0, copy_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait()?;

        rx.recv()
            .map_err(|e| Error::Gpu(e.to_string()))?
            .map_err(|e| Error::Gpu(format!("readback map failed: {}", e)))?;

        let data = slice.get_mapped_range();
        let bytes = data[..len as usize].to_vec();
        drop(data);
        staging.unmap();
        staging.destroy();

        Ok(bytes)
    }

    fn release(&self, buffer: GpuBuffer) {
        buffer.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 4);
        assert_eq!(padded_size(1), 4);
        assert_eq!(padded_size(16), 16);
        assert_eq!(padded_size(17), 20);
    }

    #[test]
    fn test_usage_for() {
        assert!(usage_for(BufferKind::Samples).contains(wgpu::BufferUsages::STORAGE));
        assert!(usage_for(BufferKind::Counter).contains(wgpu::BufferUsages::COPY_SRC));
        assert!(usage_for(BufferKind::Triangles).contains(wgpu::BufferUsages::COPY_SRC));
        let params = usage_for(BufferKind::Params);
        assert!(params.contains(wgpu::BufferUsages::UNIFORM));
        assert!(!params.contains(wgpu::BufferUsages::STORAGE));
    }

    #[test]
    fn test_prelude_bindings() {
        for binding in 0..4 {
            assert!(KERNEL_PRELUDE.contains(&format!("@binding({binding})")));
        }
    }
}
