//! Back buffers, depth buffer and the optional presentation surface.

use wgpu::{
    AddressMode, BindGroupLayout, BindingType, Color, ColorTargetState, ColorWrites, CompositeAlphaMode, Device,
    FilterMode, FragmentState, LoadOp, MultisampleState, Operations, PipelineLayoutDescriptor, PresentMode,
    PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    Sampler, SamplerBindingType, SamplerDescriptor, ShaderStages, StoreOp, Surface, SurfaceConfiguration,
    SurfaceError, TextureFormat, TextureSampleType, TextureUsages, TextureViewDescriptor, TextureViewDimension,
    VertexState,
};

use crate::{
    util::bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
    CommandQueue, Descriptor, DescriptorHeapError, Descriptors, FenceValue, InstanceAdapterDevice, PipelineError,
    RendererInitializationError, ShaderConfig, ShaderPreProcessor, Texture, TextureInfo, ViewDesc,
};

/// Format of the internal back buffers every pass renders into.
pub const BACK_BUFFER_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Texture and view handles of one back buffer.
pub struct BackBuffer {
    pub texture: Texture,
    pub rtv: Descriptor,
    pub srv: Descriptor,
}

pub struct DepthBuffer {
    pub texture: Texture,
    pub dsv: Descriptor,
    pub srv: Descriptor,
}

struct PresentTarget {
    surface: Surface<'static>,
    config: SurfaceConfiguration,
    blit_bgl: BindGroupLayout,
    blit_pipeline: RenderPipeline,
    sampler: Sampler,
}

/// Owner of the device for the renderer's whole lifetime.
///
/// Frames are rendered into `frames_in_flight` internal back buffers. With a
/// surface attached, presenting blits the frame's back buffer into the
/// swapchain image. Without one, the back buffers are the final output and
/// can be read back.
pub struct DeviceContext {
    pub iad: InstanceAdapterDevice,
    back_buffers: Vec<BackBuffer>,
    depth: DepthBuffer,
    present: Option<PresentTarget>,
    width: u32,
    height: u32,
    vsync: bool,
}

impl DeviceContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        iad: InstanceAdapterDevice,
        surface: Option<Surface<'static>>,
        descriptors: &mut Descriptors,
        spp: &ShaderPreProcessor,
        frames_in_flight: u32,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self, RendererInitializationError> {
        profiling::scope!("DeviceContext::new");

        let device = &iad.device;
        let back_buffers = (0..frames_in_flight)
            .map(|i| create_back_buffer(device, descriptors, i, width, height))
            .collect::<Result<Vec<_>, _>>()?;
        let depth = create_depth_buffer(device, descriptors, width, height)?;

        let present = match surface {
            Some(surface) => Some(create_present_target(&iad, surface, spp, width, height, vsync)?),
            None => None,
        };

        log::info!(
            "Created device context {width}x{height} with {frames_in_flight} back buffers ({})",
            if present.is_some() { "windowed" } else { "offscreen" }
        );

        Ok(Self {
            iad,
            back_buffers,
            depth,
            present,
            width,
            height,
            vsync,
        })
    }

    pub fn device(&self) -> &Device {
        &self.iad.device
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn back_buffer(&self, index: usize) -> &BackBuffer {
        &self.back_buffers[index]
    }

    pub fn back_buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    pub fn depth(&self) -> &DepthBuffer {
        &self.depth
    }

    pub fn is_offscreen(&self) -> bool {
        self.present.is_none()
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            self.vsync = vsync;
            let device = &self.iad.device;
            if let Some(target) = &mut self.present {
                target.config.present_mode = present_mode(vsync);
                target.surface.configure(device, &target.config);
            }
        }
    }

    /// Recreates every swapchain sized resource in place. The queue must be idle.
    pub fn resize(&mut self, descriptors: &mut Descriptors, width: u32, height: u32) {
        profiling::scope!("DeviceContext::resize");

        let device = &self.iad.device;
        self.width = width;
        self.height = height;

        for back_buffer in &mut self.back_buffers {
            back_buffer.texture.resize(device, width, height);
            back_buffer.texture.rebuild_views(descriptors);
        }
        self.depth.texture.resize(device, width, height);
        self.depth.texture.rebuild_views(descriptors);

        if let Some(target) = &mut self.present {
            target.config.width = width;
            target.config.height = height;
            target.surface.configure(device, &target.config);
        }

        log::info!("Resized device context to {width}x{height}");
    }

    /// Shows back buffer `index`. Returns the fence value of the blit, or `None` when offscreen.
    pub fn present(
        &self,
        queue: &mut CommandQueue,
        descriptors: &Descriptors,
        index: usize,
    ) -> Result<Option<FenceValue>, SurfaceError> {
        profiling::scope!("DeviceContext::present");

        let Some(target) = &self.present else {
            return Ok(None);
        };

        let frame = target.surface.get_current_texture()?;
        let frame_view = frame.texture.create_view(&TextureViewDescriptor::default());

        let device = &self.iad.device;
        let source = descriptors.view(self.back_buffers[index].srv);
        let bind_group = BindGroupBuilder::new()
            .append_texture_view(source)
            .append_sampler(&target.sampler)
            .build(device, Some("present blit"), &target.blit_bgl);

        let mut list = queue.get_free_command_list();
        {
            let mut rpass = list.encoder().begin_render_pass(&RenderPassDescriptor {
                label: Some("present blit"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &frame_view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&target.blit_pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }
        let fence = queue.execute_command_list(list);
        frame.present();

        Ok(Some(fence))
    }
}

fn create_back_buffer(
    device: &Device,
    descriptors: &mut Descriptors,
    index: u32,
    width: u32,
    height: u32,
) -> Result<BackBuffer, DescriptorHeapError> {
    let usage = TextureUsages::RENDER_ATTACHMENT
        | TextureUsages::TEXTURE_BINDING
        | TextureUsages::COPY_SRC
        | TextureUsages::COPY_DST;
    let label = crate::format_sso!("back buffer {index}");
    let mut texture = Texture::create(device, &label, TextureInfo::d2(width, height, BACK_BUFFER_FORMAT, usage));
    let rtv = texture.create_view(descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;
    let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
    Ok(BackBuffer { texture, rtv, srv })
}

fn create_depth_buffer(
    device: &Device,
    descriptors: &mut Descriptors,
    width: u32,
    height: u32,
) -> Result<DepthBuffer, DescriptorHeapError> {
    let usage = TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;
    let mut texture = Texture::create(device, "depth buffer", TextureInfo::d2(width, height, DEPTH_FORMAT, usage));
    let dsv = texture.create_view(descriptors, ViewDesc::DepthStencil { layer: 0 })?;
    let srv = texture.create_view(
        descriptors,
        ViewDesc::SampledRaw {
            dimension: TextureViewDimension::D2,
        },
    )?;
    Ok(DepthBuffer { texture, dsv, srv })
}

fn present_mode(vsync: bool) -> PresentMode {
    if vsync {
        PresentMode::AutoVsync
    } else {
        PresentMode::AutoNoVsync
    }
}

fn create_present_target(
    iad: &InstanceAdapterDevice,
    surface: Surface<'static>,
    spp: &ShaderPreProcessor,
    width: u32,
    height: u32,
    vsync: bool,
) -> Result<PresentTarget, PipelineError> {
    let device = &iad.device;
    let caps = surface.get_capabilities(&iad.adapter);
    // Tonemapping already outputs display encoded values.
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .unwrap_or(TextureFormat::Bgra8Unorm);

    let config = SurfaceConfiguration {
        usage: TextureUsages::RENDER_ATTACHMENT,
        format,
        width,
        height,
        present_mode: present_mode(vsync),
        desired_maximum_frame_latency: 2,
        alpha_mode: CompositeAlphaMode::Auto,
        view_formats: Vec::new(),
    };
    surface.configure(device, &config);

    let blit_bgl = BindGroupLayoutBuilder::new()
        .append(
            ShaderStages::FRAGMENT,
            BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            None,
        )
        .append(
            ShaderStages::FRAGMENT,
            BindingType::Sampler(SamplerBindingType::Filtering),
            None,
        )
        .build(device, Some("present blit bgl"));

    let sampler = device.create_sampler(&SamplerDescriptor {
        label: Some("present blit sampler"),
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        address_mode_w: AddressMode::ClampToEdge,
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        ..Default::default()
    });

    let sm = spp.create_shader_module(device, "radiance/blit.wgsl", &ShaderConfig::default())?;
    let pll = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("present blit pipeline layout"),
        bind_group_layouts: &[&blit_bgl],
        push_constant_ranges: &[],
    });
    let blit_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("present blit"),
        layout: Some(&pll),
        vertex: VertexState {
            module: &sm,
            entry_point: "vs_main",
            buffers: &[],
        },
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            module: &sm,
            entry_point: "fs_main",
            targets: &[Some(ColorTargetState {
                format,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        multiview: None,
    });

    log::info!("Configured surface as {format:?}");

    Ok(PresentTarget {
        surface,
        config,
        blit_bgl,
        blit_pipeline,
        sampler,
    })
}
