//! scalefit-gpu: `wgpu` render backend for the scalefit pipeline.
//!
//! Sources are uploaded as `R8Unorm` textures; every pass renders a
//! full-screen triangle into a fresh `R32Float` target so intermediate
//! results keep full precision (kernels with negative lobes overshoot
//! `[0, 1]`). The per-pass parameter block is a 64-byte uniform buffer
//! rewritten before each pass.
//!
//! Passes are submitted one at a time and [`GpuBackend::read_back`]
//! blocks on the device, so a render is strictly sequential.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use scalefit_pipeline::{
    BackendError, Dimensions, FloatImage, GrayImage, PASS_PARAMS_SIZE, PassDescriptor, PassKind,
    RenderBackend,
};
use tracing::{debug, info};

const SHADER: &str = include_str!("resample.wgsl");

/// Distinguishes textures created by different backends.
static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

/// A texture owned by a [`GpuBackend`].
#[derive(Debug)]
pub struct GpuImage {
    owner: u64,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimensions: Dimensions,
}

impl GpuImage {
    /// Texture dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}

struct PassPipelines {
    linearize: wgpu::RenderPipeline,
    delinearize: wgpu::RenderPipeline,
    orthogonal: wgpu::RenderPipeline,
    cylindrical: wgpu::RenderPipeline,
}

impl PassPipelines {
    const fn get(&self, kind: PassKind) -> &wgpu::RenderPipeline {
        match kind {
            PassKind::Linearize => &self.linearize,
            PassKind::Delinearize => &self.delinearize,
            PassKind::ResampleOrthogonal => &self.orthogonal,
            PassKind::ResampleCylindrical => &self.cylindrical,
        }
    }
}

/// Render backend running each pass as a WGSL fragment shader.
pub struct GpuBackend {
    id: u64,
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: PassPipelines,
    params: wgpu::Buffer,
}

impl GpuBackend {
    /// Acquire a device and compile the pass pipelines.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] if no adapter or device can
    /// be obtained, or if the shaders fail to compile.
    pub fn new() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                BackendError::Unavailable("no gpu adapter available".to_owned())
            }
            other => BackendError::Unavailable(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let info = adapter.get_info();
        let name = format!("gpu ({}, {:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("scalefit"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| BackendError::Unavailable(format!("wgpu request_device failed: {e:?}")))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scalefit_pass_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(PASS_PARAMS_SIZE as u64),
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scalefit_resample_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scalefit_pass_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = PassPipelines {
            linearize: create_pipeline(&device, &layout, &shader, "fs_linearize"),
            delinearize: create_pipeline(&device, &layout, &shader, "fs_delinearize"),
            orthogonal: create_pipeline(&device, &layout, &shader, "fs_orthogonal"),
            cylindrical: create_pipeline(&device, &layout, &shader, "fs_cylindrical"),
        };

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scalefit_pass_params"),
            size: PASS_PARAMS_SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::Unavailable(format!(
                "failed to build pass pipelines: {err}"
            )));
        }

        info!(backend = %name, "gpu backend ready");
        Ok(Self {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            name,
            device,
            queue,
            bind_group_layout,
            pipelines,
            params,
        })
    }

    fn check_owner(&self, image: &GpuImage) -> Result<(), BackendError> {
        if image.owner == self.id {
            Ok(())
        } else {
            Err(BackendError::UnknownImage)
        }
    }

    fn check_size(&self, dimensions: Dimensions) -> Result<(), BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if dimensions.is_empty() || dimensions.width > max || dimensions.height > max {
            return Err(BackendError::Allocation(format!(
                "texture size {dimensions} is outside 1..={max}"
            )));
        }
        Ok(())
    }

    fn create_image(
        &self,
        dimensions: Dimensions,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: &str,
    ) -> Result<GpuImage, BackendError> {
        self.check_size(dimensions)?;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(dimensions),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Allocation(err.to_string()));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuImage {
            owner: self.id,
            texture,
            view,
            dimensions,
        })
    }
}

impl RenderBackend for GpuBackend {
    type Image = GpuImage;

    fn name(&self) -> &str {
        &self.name
    }

    fn upload(&mut self, image: &GrayImage) -> Result<GpuImage, BackendError> {
        let dimensions = Dimensions::of(image);
        let uploaded = self.create_image(
            dimensions,
            wgpu::TextureFormat::R8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            "scalefit_source",
        )?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &uploaded.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(dimensions.width),
                rows_per_image: Some(dimensions.height),
            },
            extent(dimensions),
        );
        debug!(%dimensions, "uploaded source texture");
        Ok(uploaded)
    }

    fn run_pass(&mut self, pass: &PassDescriptor<'_, GpuImage>) -> Result<GpuImage, BackendError> {
        self.check_owner(pass.input)?;
        let target = self.create_image(
            pass.output,
            wgpu::TextureFormat::R32Float,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            "scalefit_pass_target",
        )?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_buffer(&self.params, 0, &pass.params.to_bytes());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scalefit_pass_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&pass.input.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scalefit_pass_encoder"),
        });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scalefit_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(self.pipelines.get(pass.kind));
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Pass(format!("{} pass: {err}", pass.kind)));
        }
        Ok(target)
    }

    fn read_back(&mut self, image: &GpuImage) -> Result<FloatImage, BackendError> {
        self.check_owner(image)?;
        let Dimensions { width, height } = image.dimensions;
        let row_bytes = width
            .checked_mul(4)
            .ok_or_else(|| BackendError::Readback("row size overflow".to_owned()))?;
        let padded_row_bytes = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer_size = u64::from(padded_row_bytes) * u64::from(height);

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scalefit_readback"),
            size: buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scalefit_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            extent(image.dimensions),
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| BackendError::Readback(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| BackendError::Readback("readback channel closed".to_owned()))?
            .map_err(|e| BackendError::Readback(format!("buffer map failed: {e:?}")))?;

        let data = {
            let mapped = slice.get_mapped_range();
            let row_bytes = row_bytes as usize;
            let padded_row_bytes = padded_row_bytes as usize;
            let mut data = Vec::with_capacity(width as usize * height as usize);
            for row in 0..height as usize {
                let start = row * padded_row_bytes;
                data.extend(
                    mapped[start..start + row_bytes]
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                );
            }
            data
        };
        readback.unmap();

        FloatImage::from_raw(image.dimensions, data)
            .ok_or_else(|| BackendError::Readback("readback size mismatch".to_owned()))
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(entry_point),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::R32Float,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

const fn extent(dimensions: Dimensions) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: dimensions.width,
        height: dimensions.height,
        depth_or_array_layers: 1,
    }
}

const fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scalefit_pipeline::{
        CpuBackend, FilterMode, Kernel, KernelParameters, ResamplingPipeline, Ssim,
    };

    use super::*;

    /// Acquire a GPU backend, or `None` on machines without an adapter.
    fn gpu() -> Option<GpuBackend> {
        match GpuBackend::new() {
            Ok(backend) => Some(backend),
            Err(err) => {
                eprintln!("skipping gpu test: {err}");
                None
            }
        }
    }

    fn ramp(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            image::Luma([u8::try_from((x * 37 + y * 11) % 256).unwrap()])
        })
    }

    fn render<B: RenderBackend>(
        backend: B,
        source: &GrayImage,
        target: Dimensions,
        filter: FilterMode,
        params: &KernelParameters,
    ) -> FloatImage {
        let mut pipeline = ResamplingPipeline::new(backend, source, target, filter).unwrap();
        pipeline.render(params).unwrap()
    }

    #[test]
    fn align_to_rounds_up() {
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
    }

    #[test]
    fn upload_then_identity_pass_round_trips() {
        let Some(mut backend) = gpu() else { return };
        let source = ramp(7, 5);
        let uploaded = backend.upload(&source).unwrap();
        let params = scalefit_pipeline::PassParams::new(
            &KernelParameters::default(),
            Dimensions::of(&source),
            1.0,
        );
        let out = backend
            .run_pass(&PassDescriptor {
                input: &uploaded,
                output: Dimensions::of(&source),
                kind: PassKind::Linearize,
                params,
            })
            .unwrap();
        let back = backend.read_back(&out).unwrap();
        let expected = FloatImage::from_gray(&source);
        for (a, b) in back.as_raw().iter().zip(expected.as_raw()) {
            assert!((a - scalefit_pipeline::cpu::srgb_to_linear(*b)).abs() < 1e-4);
        }
    }

    #[test]
    fn matches_cpu_backend() {
        let Some(backend) = gpu() else { return };
        let source = ramp(9, 7);
        let cases = [
            (Dimensions::new(18, 14), FilterMode::Orthogonal, Kernel::Lanczos),
            (Dimensions::new(13, 10), FilterMode::Cylindrical, Kernel::Hamming),
            (Dimensions::new(4, 3), FilterMode::Orthogonal, Kernel::BcSpline),
        ];
        let mut backend = Some(backend);
        for (target, filter, kernel) in cases {
            let params = KernelParameters {
                kernel,
                radius: 2.0,
                p1: 1.0 / 3.0,
                p2: 1.0 / 3.0,
                ..KernelParameters::default()
            };
            let gpu_backend = backend.take().unwrap();
            let mut pipeline = ResamplingPipeline::new(gpu_backend, &source, target, filter).unwrap();
            let on_gpu = pipeline.render(&params).unwrap();
            backend = Some(pipeline.into_backend());

            let on_cpu = render(CpuBackend::new(), &source, target, filter, &params);
            assert_eq!(on_gpu.dimensions(), target);
            for (g, c) in on_gpu.as_raw().iter().zip(on_cpu.as_raw()) {
                assert!((g - c).abs() < 2e-3, "{filter} {kernel}: gpu {g} cpu {c}");
            }
        }
    }

    #[test]
    fn identical_scores_match_across_backends() {
        let Some(backend) = gpu() else { return };
        let source = GrayImage::from_pixel(4, 4, image::Luma([128]));
        let reference = GrayImage::from_pixel(8, 8, image::Luma([128]));
        let mut pipeline =
            ResamplingPipeline::new(backend, &source, Dimensions::new(8, 8), FilterMode::Orthogonal)
                .unwrap();
        pipeline.resample(&KernelParameters::default()).unwrap();
        let score = pipeline.compare(&reference, &Ssim::default()).unwrap();
        assert!((score - 1.0).abs() < 1e-5, "{score}");
    }

    #[test]
    fn foreign_image_is_rejected() {
        let (Some(mut a), Some(mut b)) = (gpu(), gpu()) else {
            return;
        };
        let image = a.upload(&ramp(2, 2)).unwrap();
        assert!(matches!(b.read_back(&image), Err(BackendError::UnknownImage)));
    }
}
