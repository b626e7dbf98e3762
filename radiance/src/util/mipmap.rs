//! Mipmap generation tools.

use parking_lot::RwLock;
use wgpu::{
    AddressMode, BindGroup, BindGroupLayout, BindingType, Color, ColorTargetState, ColorWrites, CommandEncoder,
    Device, FilterMode, FragmentState, LoadOp, MultisampleState, Operations, PipelineLayout,
    PipelineLayoutDescriptor, PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, SamplerBindingType, SamplerDescriptor, ShaderModule, ShaderStages, StoreOp,
    TextureFormat, TextureSampleType, TextureView, TextureViewDescriptor, TextureViewDimension, VertexState,
};

use crate::{
    format_sso,
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        typedefs::FastHashMap,
    },
    MipmapError, PipelineError, ShaderConfig, ShaderPreProcessor, Texture,
};

/// Generator for mipmaps of square, power of two 2D textures and cubemaps.
pub struct MipmapGenerator {
    texture_bgl: BindGroupLayout,
    sampler_bg: BindGroup,
    sm: ShaderModule,
    pll: PipelineLayout,
    pipelines: RwLock<FastHashMap<TextureFormat, RenderPipeline>>,
}

impl MipmapGenerator {
    pub fn new(
        device: &Device,
        spp: &ShaderPreProcessor,
        config: &ShaderConfig,
        default_formats: &[TextureFormat],
    ) -> Result<Self, PipelineError> {
        profiling::scope!("MipmapGenerator::new");

        let texture_bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                None,
            )
            .build(device, Some("mipmap generator texture bgl"));

        let sampler_bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::FRAGMENT,
                BindingType::Sampler(SamplerBindingType::Filtering),
                None,
            )
            .build(device, Some("mipmap generator sampler bgl"));

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("mipmap generator sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            ..Default::default()
        });

        let sampler_bg = BindGroupBuilder::new().append_sampler(&sampler).build(
            device,
            Some("mipmap generator sampler bg"),
            &sampler_bgl,
        );

        let sm = spp.create_shader_module(device, "radiance/mipmap.wgsl", config)?;

        let pll = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("mipmap generator pipeline layout"),
            bind_group_layouts: &[&texture_bgl, &sampler_bgl],
            push_constant_ranges: &[],
        });

        let pipelines = default_formats
            .iter()
            .map(|&format| (format, Self::build_blit_pipeline(device, format, &pll, &sm)))
            .collect();

        Ok(Self {
            texture_bgl,
            sampler_bg,
            sm,
            pll,
            pipelines: RwLock::new(pipelines),
        })
    }

    fn build_blit_pipeline(
        device: &Device,
        format: TextureFormat,
        pll: &PipelineLayout,
        sm: &ShaderModule,
    ) -> RenderPipeline {
        let label = format_sso!("mipmap pipeline {:?}", format);
        profiling::scope!(&label);
        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(pll),
            vertex: VertexState {
                module: sm,
                entry_point: "vs_main",
                buffers: &[],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: sm,
                entry_point: "fs_main",
                targets: &[Some(ColorTargetState {
                    format,
                    blend: None,
                    write_mask: ColorWrites::all(),
                })],
            }),
            multiview: None,
        })
    }

    /// Downsamples every mip of every array layer from the level above it.
    pub fn generate_mipmaps(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        texture: &Texture,
    ) -> Result<(), MipmapError> {
        profiling::scope!("generating mipmaps");

        let info = texture.info();
        if info.width != info.height || !info.width.is_power_of_two() {
            return Err(MipmapError::NotSquarePowerOfTwo {
                width: info.width,
                height: info.height,
            });
        }

        if !self.pipelines.read().contains_key(&info.format) {
            log::debug!("Building mipmap pipeline for {:?} on first use", info.format);
            let pipeline = Self::build_blit_pipeline(device, info.format, &self.pll, &self.sm);
            self.pipelines.write().insert(info.format, pipeline);
        }
        let pipelines = self.pipelines.read();
        let pipeline = pipelines
            .get(&info.format)
            .ok_or(MipmapError::UnsupportedFormat(info.format))?;

        for layer in 0..info.depth_or_array_layers {
            let level_view = |mip: u32| -> TextureView {
                texture.raw().create_view(&TextureViewDescriptor {
                    label: None,
                    dimension: Some(TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            };

            let mut source = level_view(0);
            for mip in 1..info.mip_level_count {
                let target = level_view(mip);
                let label = format_sso!("{} layer {layer} mip {mip}", texture.label());
                profiling::scope!(&label);

                let bg = BindGroupBuilder::new().append_texture_view(&source).build(
                    device,
                    Some(&label),
                    &self.texture_bgl,
                );

                let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
                    label: Some(&label),
                    color_attachments: &[Some(RenderPassColorAttachment {
                        view: &target,
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
                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, &bg, &[]);
                rpass.set_bind_group(1, &self.sampler_bg, &[]);
                rpass.draw(0..3, 0..1);
                drop(rpass);

                source = target;
            }
        }

        Ok(())
    }
}
