//! wgpu compute accelerator.

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use framecut_core::accelerator::{common_len, expect_arity, kernel};
use framecut_core::{
    Accelerator, AcceleratorKind, ExecutionMode, FrameCutError, FrameCutResult, Operand,
};

use crate::accel::DISPATCH_LOCK;

const WORKGROUP_SIZE: u32 = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    max_value: f32,
    len: u32,
    target_r: f32,
    target_g: f32,
    target_b: f32,
    tolerance: f32,
    op: u32,
    pad: u32,
}

impl KernelParams {
    fn new(max_value: f32, len: u32, op: u32) -> Self {
        Self {
            max_value,
            len,
            target_r: 0.0,
            target_g: 0.0,
            target_b: 0.0,
            tolerance: 0.0,
            op,
            pad: 0,
        }
    }
}

/// Runs the kernels as WGSL compute shaders on one adapter.
pub struct GpuAccelerator {
    name: String,
    mode: ExecutionMode,
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    blend: wgpu::ComputePipeline,
    remove_color: wgpu::ComputePipeline,
}

impl GpuAccelerator {
    /// Open adapter `device_id` (in enumeration order) and compile the kernels.
    pub fn new(device_id: usize, mode: ExecutionMode) -> FrameCutResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .nth(device_id)
            .ok_or_else(|| FrameCutError::Device(format!("no GPU adapter with id {device_id}")))?;
        let info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("FrameCut Compute Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| FrameCutError::Device(format!("failed to open {}: {e}", info.name)))?;

        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/kernels.wgsl"));

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kernel_bind_group_layout"),
            entries: &[
                storage(0, true),
                storage(1, true),
                storage(2, true),
                storage(3, true),
                storage(4, false),
                storage(5, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
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
            label: Some("kernel_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };
        let blend = pipeline("blend");
        let remove_color = pipeline("remove_color");

        tracing::info!("GPU accelerator on {} ({:?})", info.name, info.backend);

        Ok(Self {
            name: format!("gpu:{}", info.name),
            mode,
            device,
            queue,
            layout,
            blend,
            remove_color,
        })
    }

    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        inputs: [&[f32]; 4],
        params: KernelParams,
        outputs: usize,
    ) -> FrameCutResult<Vec<Vec<f32>>> {
        let len = params.len as usize;
        let groups = (params.len + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
        if groups > self.device.limits().max_compute_workgroups_per_dimension {
            return Err(FrameCutError::Device(format!(
                "{len} pixels exceed the device dispatch limit"
            )));
        }
        if len == 0 {
            return Ok(vec![Vec::new(); outputs]);
        }

        let byte_len = (len * std::mem::size_of::<f32>()) as wgpu::BufferAddress;
        let input_buffers: Vec<wgpu::Buffer> = inputs
            .iter()
            .map(|plane| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("kernel_input"),
                    contents: bytemuck::cast_slice(plane),
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();
        let output_buffers: Vec<wgpu::Buffer> = (0..2)
            .map(|_| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("kernel_output"),
                    size: byte_len,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("kernel_params"),
            contents: bytemuck::cast_slice(&[params]),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = input_buffers
            .iter()
            .chain(output_buffers.iter())
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: 6,
            resource: params_buffer.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel_bind_group"),
            layout: &self.layout,
            entries: &entries,
        });

        let staging: Vec<wgpu::Buffer> = (0..outputs)
            .map(|_| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("kernel_readback"),
                    size: byte_len,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(groups, 1, 1);
        }
        for (src, dst) in output_buffers.iter().zip(staging.iter()) {
            encoder.copy_buffer_to_buffer(src, 0, dst, 0, byte_len);
        }
        self.queue.submit(Some(encoder.finish()));

        let mut results = Vec::with_capacity(outputs);
        for buffer in &staging {
            let slice = buffer.slice(..);
            let (tx, rx) = mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |v| {
                let _ = tx.send(v);
            });
            self.device.poll(wgpu::Maintain::Wait);
            rx.recv()
                .map_err(|_| FrameCutError::Device("readback channel closed".into()))?
                .map_err(|e| FrameCutError::Device(format!("readback failed: {e}")))?;
            let data = bytemuck::cast_slice::<u8, f32>(&slice.get_mapped_range()).to_vec();
            buffer.unmap();
            results.push(data);
        }
        Ok(results)
    }
}

impl Accelerator for GpuAccelerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Gpu
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn compute(&self, name: &str, operands: &[Operand<'_>]) -> FrameCutResult<Vec<Vec<f32>>> {
        let _guard = match self.mode {
            ExecutionMode::Synchronous => Some(DISPATCH_LOCK.lock()),
            ExecutionMode::Concurrent => None,
        };

        let op = match name {
            kernel::OVERLAY => Some(0),
            kernel::ADD => Some(1),
            kernel::MINUS => Some(2),
            kernel::MULTIPLY => Some(3),
            _ => None,
        };

        if let Some(op) = op {
            expect_arity(name, operands, 5)?;
            let planes = [
                operands[0].as_plane(0)?,
                operands[1].as_plane(1)?,
                operands[2].as_plane(2)?,
                operands[3].as_plane(3)?,
            ];
            let max = operands[4].as_scalar(4)?;
            let len = common_len(&planes)?;
            return self.dispatch(&self.blend, planes, KernelParams::new(max, len as u32, op), 2);
        }

        if name == kernel::REMOVE_COLOR {
            expect_arity(name, operands, 9)?;
            let planes = [
                operands[0].as_plane(0)?,
                operands[1].as_plane(1)?,
                operands[2].as_plane(2)?,
                operands[3].as_plane(3)?,
            ];
            let len = common_len(&planes)?;
            let mut params = KernelParams::new(operands[8].as_scalar(8)?, len as u32, 0);
            params.target_r = operands[4].as_scalar(4)?;
            params.target_g = operands[5].as_scalar(5)?;
            params.target_b = operands[6].as_scalar(6)?;
            params.tolerance = operands[7].as_scalar(7)?;
            return self.dispatch(&self.remove_color, planes, params, 1);
        }

        Err(FrameCutError::unsupported(format!("unknown kernel `{name}`")))
    }
}
