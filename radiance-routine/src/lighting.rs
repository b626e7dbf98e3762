//! Deferred lighting: direct light with cascaded shadows plus image based and voxel traced ambient light.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use radiance::{
    util::bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
    BackBuffer, DepthBuffer, PipelineError, ResourceState, BACK_BUFFER_FORMAT, RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    BindGroupLayout, BindingType, Color, ColorTargetState, ColorWrites, FragmentState, LoadOp, MultisampleState,
    Operations, PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderStages, StoreOp, TextureSampleType, TextureViewDimension, VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext, PASS_GROUP},
    gbuffer::{GBuffer, GBufferSlot},
    ibl::IblMaps,
    shadow::CascadedShadowMap,
    ssao::AmbientMaps,
    RenderError,
};

const LIGHTING_PIPELINE: &str = "lighting";

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct LightingPush {
    albedo: u32,
    normal: u32,
    metalness: u32,
    roughness: u32,
    ambient: u32,
    ambient_occlusion: u32,
    voxel: u32,
    irradiance: u32,
    prefiltered: u32,
    brdf_lut: u32,
    prefiltered_mips: u32,
}

/// Everything the lighting pass reads.
pub struct LightingSources<'a> {
    pub gbuffer: &'a GBuffer,
    pub depth: &'a DepthBuffer,
    pub shadow_map: &'a CascadedShadowMap,
    pub ambient: &'a AmbientMaps,
    pub ibl: &'a IblMaps,
    /// Bindless index of the radiance volume to cone trace.
    pub voxel: u32,
}

impl LightingSources<'_> {
    fn push(&self) -> LightingPush {
        LightingPush {
            albedo: self.gbuffer.srv_index(GBufferSlot::Albedo),
            normal: self.gbuffer.srv_index(GBufferSlot::Normal),
            metalness: self.gbuffer.srv_index(GBufferSlot::Metalness),
            roughness: self.gbuffer.srv_index(GBufferSlot::Roughness),
            ambient: self.gbuffer.srv_index(GBufferSlot::Ambient),
            ambient_occlusion: self.ambient.srv_index(),
            voxel: self.voxel,
            irradiance: self.ibl.irradiance_index(),
            prefiltered: self.ibl.prefiltered_index(),
            brdf_lut: self.ibl.brdf_lut_index(),
            prefiltered_mips: self.ibl.prefiltered_mips(),
        }
    }
}

pub struct LightingPass {
    pipeline: Arc<RenderPipeline>,
    bgl: BindGroupLayout,
}

impl LightingPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("LightingPass::new");

        let depth_entry = |view_dimension| BindingType::Texture {
            sample_type: TextureSampleType::Depth,
            view_dimension,
            multisampled: false,
        };
        let bgl = BindGroupLayoutBuilder::new()
            .append(ShaderStages::FRAGMENT, depth_entry(TextureViewDimension::D2), None)
            .append(ShaderStages::FRAGMENT, depth_entry(TextureViewDimension::D2Array), None)
            .build(args.device, Some("lighting bgl"));

        let sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/lighting.wgsl", args.shader_config)?;
        let layout = args.registry.layout_with(args.device, "lighting pipeline layout", &bgl);

        let pipeline = args.registry.create_render(
            args.device,
            LIGHTING_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("lighting pass"),
                layout: Some(&layout),
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
                        format: BACK_BUFFER_FORMAT,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                multiview: None,
            },
        )?;

        Ok(Self { pipeline, bgl })
    }

    /// Shades every pixel of the back buffer from the surface attributes.
    pub fn record(
        &self,
        ctx: &mut RecordContext<'_>,
        sources: &LightingSources<'_>,
        target: &BackBuffer,
    ) -> Result<(), RenderError> {
        profiling::scope!("LightingPass::record");

        for slot in GBufferSlot::ALL {
            ctx.state
                .require(sources.gbuffer.texture(slot).label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
        }
        ctx.state
            .require(sources.shadow_map.texture().label(), ResourceState::SHADER_RESOURCE)?;
        ctx.state.require(sources.depth.texture.label(), ResourceState::DEPTH_READ)?;
        ctx.state.transition(target.texture.label(), ResourceState::RENDER_TARGET)?;

        let pass_bg = BindGroupBuilder::new()
            .append_texture_view(ctx.descriptors.view(sources.depth.srv))
            .append_texture_view(ctx.descriptors.view(sources.shadow_map.srv()))
            .build(ctx.device, Some("lighting bg"), &self.bgl);

        let bindings = ctx.bindings;
        let table = ctx.table(&[target.texture.id()]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("lighting"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(target.rtv),
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

        rpass.set_pipeline(&self.pipeline);
        bindings.bind_render(&mut rpass, &table);
        rpass.set_bind_group(PASS_GROUP, &pass_bg, &[]);
        rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&sources.push()));
        rpass.draw(0..3, 0..1);

        Ok(())
    }
}
