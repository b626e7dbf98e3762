//! Screen space ambient occlusion at half resolution with an edge preserving blur.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use radiance::{
    util::bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
    DepthBuffer, Descriptor, Descriptors, PipelineError, ResourceState, ResourceStateTracker, Texture, TextureInfo,
    ViewDesc, RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    BindGroupLayout, BindingType, Color, ColorTargetState, ColorWrites, Device, FragmentState, LoadOp,
    MultisampleState, Operations, PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderStages, StoreOp, TextureFormat, TextureSampleType, TextureUsages,
    TextureViewDimension, VertexState,
};

use crate::{
    common::{
        gauss_weights, ndc_to_texture, pack_blur_weights, ssao_offsets, PassNewArgs, RecordContext, SsaoConstants,
        PASS_GROUP,
    },
    gbuffer::{GBuffer, GBufferSlot},
    RenderError, SetupError,
};

pub const SSAO_FORMAT: TextureFormat = TextureFormat::R16Float;
const SSAO_PIPELINE: &str = "ssao";
const SSAO_BLUR_PIPELINE: &str = "ssao blur";

/// Horizontal plus vertical blur rounds applied to the raw occlusion.
pub const BLUR_ITERATIONS: u32 = 3;
const BLUR_SIGMA: f32 = 2.5;

/// Size of the ambient maps for a `width` by `height` screen.
pub fn map_size(width: u32, height: u32) -> (u32, u32) {
    ((width / 2).max(1), (height / 2).max(1))
}

/// Constants for occlusion computed against `proj` into maps of `map_size`.
pub fn ssao_constants(proj: Mat4, map_size: (u32, u32)) -> SsaoConstants {
    SsaoConstants {
        proj,
        inv_proj: proj.inverse(),
        proj_tex: ndc_to_texture() * proj,
        offsets: ssao_offsets(),
        blur_weights: pack_blur_weights(&gauss_weights(BLUR_SIGMA)),
        inv_render_target_size: Vec2::new(1.0 / map_size.0 as f32, 1.0 / map_size.1 as f32),
        occlusion_radius: 0.05,
        fade_start: 0.2,
        fade_end: 1.0,
        surface_epsilon: 0.05,
    }
}

struct AmbientMap {
    texture: Texture,
    rtv: Descriptor,
    srv: Descriptor,
}

/// The two ambient maps the occlusion is computed into and blurred between.
/// The result always ends up in the first.
pub struct AmbientMaps {
    maps: [AmbientMap; 2],
}

impl AmbientMaps {
    pub fn new(device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) -> Result<Self, SetupError> {
        let (width, height) = map_size(width, height);
        let mut create = |label: &str| -> Result<AmbientMap, SetupError> {
            let info = TextureInfo::d2(
                width,
                height,
                SSAO_FORMAT,
                TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            );
            let mut texture = Texture::create(device, label, info);
            let rtv = texture.create_view(descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;
            let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
            Ok(AmbientMap { texture, rtv, srv })
        };

        Ok(Self {
            maps: [create("ambient map 0")?, create("ambient map 1")?],
        })
    }

    /// Bindless index of the blurred ambient accessibility.
    pub fn srv_index(&self) -> u32 {
        self.maps[0].srv.index()
    }

    pub fn texture(&self) -> &Texture {
        &self.maps[0].texture
    }

    pub fn textures(&self) -> impl Iterator<Item = &Texture> {
        self.maps.iter().map(|map| &map.texture)
    }

    pub fn register_states(&self, state: &mut ResourceStateTracker) {
        for map in &self.maps {
            state.register(map.texture.label(), ResourceState::SHADER_RESOURCE);
        }
    }

    pub fn resize(&mut self, device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) {
        let (width, height) = map_size(width, height);
        for map in &mut self.maps {
            map.texture.resize(device, width, height);
            map.texture.rebuild_views(descriptors);
        }
    }
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct SsaoPush {
    normal_index: u32,
    input_index: u32,
    horizontal: u32,
    pad: u32,
}

pub struct SsaoPass {
    ssao: Arc<RenderPipeline>,
    blur: Arc<RenderPipeline>,
    bgl: BindGroupLayout,
}

impl SsaoPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("SsaoPass::new");

        let bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                None,
            )
            .build(args.device, Some("ssao bgl"));

        let sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/ssao.wgsl", args.shader_config)?;
        let layout = args.registry.layout_with(args.device, "ssao pipeline layout", &bgl);

        let create = |name: &str, entry_point: &str| {
            args.registry.create_render(
                args.device,
                name,
                &RenderPipelineDescriptor {
                    label: Some(name),
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
                        entry_point,
                        targets: &[Some(ColorTargetState {
                            format: SSAO_FORMAT,
                            blend: None,
                            write_mask: ColorWrites::ALL,
                        })],
                    }),
                    multiview: None,
                },
            )
        };

        Ok(Self {
            ssao: create(SSAO_PIPELINE, "ssao_main")?,
            blur: create(SSAO_BLUR_PIPELINE, "blur_main")?,
            bgl,
        })
    }

    /// Computes occlusion into the first map, then blurs it back and forth
    /// [`BLUR_ITERATIONS`] times.
    pub fn record(
        &self,
        ctx: &mut RecordContext<'_>,
        gbuffer: &GBuffer,
        depth: &DepthBuffer,
        maps: &AmbientMaps,
    ) -> Result<(), RenderError> {
        profiling::scope!("SsaoPass::record");

        ctx.state.require(depth.texture.label(), ResourceState::DEPTH_READ)?;
        ctx.state.require(
            gbuffer.texture(GBufferSlot::Normal).label(),
            ResourceState::PIXEL_SHADER_RESOURCE,
        )?;

        let depth_bg = BindGroupBuilder::new()
            .append_texture_view(ctx.descriptors.view(depth.srv))
            .build(ctx.device, Some("ssao depth bg"), &self.bgl);

        let normal_index = gbuffer.srv_index(GBufferSlot::Normal);
        self.draw(
            ctx,
            &self.ssao,
            &depth_bg,
            &maps.maps[0],
            SsaoPush {
                normal_index,
                input_index: 0,
                horizontal: 0,
                pad: 0,
            },
        )?;

        for _ in 0..BLUR_ITERATIONS {
            for (source, dest, horizontal) in [(0, 1, 1), (1, 0, 0)] {
                let push = SsaoPush {
                    normal_index,
                    input_index: maps.maps[source].srv.index(),
                    horizontal,
                    pad: 0,
                };
                self.draw(ctx, &self.blur, &depth_bg, &maps.maps[dest], push)?;
            }
        }

        Ok(())
    }

    fn draw(
        &self,
        ctx: &mut RecordContext<'_>,
        pipeline: &RenderPipeline,
        depth_bg: &wgpu::BindGroup,
        target: &AmbientMap,
        push: SsaoPush,
    ) -> Result<(), RenderError> {
        ctx.state.transition(target.texture.label(), ResourceState::RENDER_TARGET)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&[target.texture.id()]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("ssao"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(target.rtv),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::WHITE),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(pipeline);
        bindings.bind_render(&mut rpass, &table);
        rpass.set_bind_group(PASS_GROUP, depth_bg, &[]);
        rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
        rpass.draw(0..3, 0..1);
        drop(rpass);

        ctx.state.transition(target.texture.label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_are_half_resolution() {
        assert_eq!(map_size(1280, 720), (640, 360));
        assert_eq!(map_size(1, 1), (1, 1));
    }

    #[test]
    fn constants_use_the_map_size() {
        let proj = Mat4::perspective_lh(0.25 * std::f32::consts::PI, 16.0 / 9.0, 1.0, 1000.0);
        let constants = ssao_constants(proj, (640, 360));
        assert_eq!(constants.inv_render_target_size, Vec2::new(1.0 / 640.0, 1.0 / 360.0));
        assert!((constants.proj * constants.inv_proj).abs_diff_eq(Mat4::IDENTITY, 1e-4));

        // A point straight ahead lands in the middle of the map.
        let ahead = constants.proj_tex * glam::Vec4::new(0.0, 0.0, 10.0, 1.0);
        assert!((ahead.x / ahead.w - 0.5).abs() < 1e-5);
        assert!((ahead.y / ahead.w - 0.5).abs() < 1e-5);
    }
}
