//! Geometry pass filling the screen sized surface attribute targets.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use radiance::{
    DepthBuffer, Descriptor, Descriptors, PipelineError, ResourceState, ResourceStateTracker, Texture, TextureId,
    TextureInfo, ViewDesc, DEPTH_FORMAT, RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    Color, ColorTargetState, ColorWrites, CompareFunction, DepthBiasState, DepthStencilState, Device, Face,
    FragmentState, FrontFace, LoadOp, MultisampleState, Operations, PolygonMode, PrimitiveState, PrimitiveTopology,
    RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, StencilState, StoreOp, TextureFormat, TextureUsages, TextureViewDimension, VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext, VERTEX_LAYOUT},
    scene::Scene,
    RenderError, SetupError,
};

const GBUFFER_PIPELINE: &str = "gbuffer";

/// Index of each target, matching the fragment outputs of `gbuffer.wgsl`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GBufferSlot {
    Albedo,
    Normal,
    Metalness,
    Roughness,
    Ambient,
    Velocity,
}

impl GBufferSlot {
    pub const ALL: [Self; 6] = [
        Self::Albedo,
        Self::Normal,
        Self::Metalness,
        Self::Roughness,
        Self::Ambient,
        Self::Velocity,
    ];

    pub fn format(self) -> TextureFormat {
        match self {
            Self::Albedo => TextureFormat::Rgba8Unorm,
            Self::Normal => TextureFormat::Rgba16Float,
            Self::Metalness | Self::Roughness => TextureFormat::R8Unorm,
            Self::Ambient => TextureFormat::Rgba16Float,
            Self::Velocity => TextureFormat::Rg16Float,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Albedo => "gbuffer albedo",
            Self::Normal => "gbuffer normal",
            Self::Metalness => "gbuffer metalness",
            Self::Roughness => "gbuffer roughness",
            Self::Ambient => "gbuffer ambient",
            Self::Velocity => "gbuffer velocity",
        }
    }
}

struct GBufferTarget {
    texture: Texture,
    rtv: Descriptor,
    srv: Descriptor,
}

/// The screen sized targets the geometry pass writes and lighting reads.
pub struct GBuffer {
    targets: Vec<GBufferTarget>,
}

impl GBuffer {
    pub fn new(device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) -> Result<Self, SetupError> {
        profiling::scope!("GBuffer::new");

        let mut targets = Vec::with_capacity(GBufferSlot::ALL.len());
        for slot in GBufferSlot::ALL {
            let info = TextureInfo::d2(
                width,
                height,
                slot.format(),
                TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            );
            let mut texture = Texture::create(device, slot.label(), info);
            let rtv = texture.create_view(descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;
            let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
            targets.push(GBufferTarget { texture, rtv, srv });
        }

        Ok(Self { targets })
    }

    pub fn texture(&self, slot: GBufferSlot) -> &Texture {
        &self.targets[slot as usize].texture
    }

    pub fn textures(&self) -> impl Iterator<Item = &Texture> {
        self.targets.iter().map(|target| &target.texture)
    }

    /// Bindless index of the target's sampled view.
    pub fn srv_index(&self, slot: GBufferSlot) -> u32 {
        self.targets[slot as usize].srv.index()
    }

    pub fn ids(&self) -> Vec<TextureId> {
        self.targets.iter().map(|target| target.texture.id()).collect()
    }

    pub fn register_states(&self, state: &mut ResourceStateTracker) {
        for target in &self.targets {
            state.register(target.texture.label(), ResourceState::SHADER_RESOURCE);
        }
    }

    /// Reallocates every target, keeping their bindless indices.
    pub fn resize(&mut self, device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) {
        for target in &mut self.targets {
            target.texture.resize(device, width, height);
            target.texture.rebuild_views(descriptors);
        }
    }
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct DrawPush {
    object_index: u32,
    material_index: u32,
}

pub struct GBufferPass {
    pipeline: Arc<RenderPipeline>,
}

impl GBufferPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("GBufferPass::new");

        let sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/gbuffer.wgsl", args.shader_config)?;

        let targets: Vec<Option<ColorTargetState>> = GBufferSlot::ALL
            .iter()
            .map(|slot| {
                Some(ColorTargetState {
                    format: slot.format(),
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = args.registry.create_render(
            args.device,
            GBUFFER_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("gbuffer pass"),
                layout: Some(args.registry.layout()),
                vertex: VertexState {
                    module: &sm,
                    entry_point: "vs_main",
                    buffers: &[VERTEX_LAYOUT.clone()],
                },
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: FrontFace::Cw,
                    cull_mode: Some(Face::Back),
                    unclipped_depth: false,
                    polygon_mode: PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: CompareFunction::Less,
                    stencil: StencilState::default(),
                    bias: DepthBiasState::default(),
                }),
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    module: &sm,
                    entry_point: "fs_main",
                    targets: &targets,
                }),
                multiview: None,
            },
        )?;

        Ok(Self { pipeline })
    }

    pub fn record(
        &self,
        ctx: &mut RecordContext<'_>,
        scene: &Scene,
        gbuffer: &GBuffer,
        depth: &DepthBuffer,
    ) -> Result<(), RenderError> {
        profiling::scope!("GBufferPass::record");

        for target in &gbuffer.targets {
            ctx.state.transition(target.texture.label(), ResourceState::RENDER_TARGET)?;
        }
        ctx.state.transition(depth.texture.label(), ResourceState::DEPTH_WRITE)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&gbuffer.ids());

        let descriptors = &*ctx.descriptors;
        let color_attachments: Vec<_> = gbuffer
            .targets
            .iter()
            .map(|target| {
                Some(RenderPassColorAttachment {
                    view: descriptors.view(target.rtv),
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::TRANSPARENT),
                        store: StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("gbuffer"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: descriptors.view(depth.dsv),
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(&self.pipeline);
        bindings.bind_render(&mut rpass, &table);
        scene.record_draws(&mut rpass, 0..1, |rpass, call| {
            let push = DrawPush {
                object_index: call.object_index,
                material_index: call.material_index,
            };
            rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
        });
        drop(rpass);

        for target in &gbuffer.targets {
            ctx.state.transition(target.texture.label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
        }
        ctx.state.transition(depth.texture.label(), ResourceState::DEPTH_READ)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_shader_outputs() {
        for (index, slot) in GBufferSlot::ALL.iter().enumerate() {
            assert_eq!(*slot as usize, index);
        }
        assert_eq!(GBufferSlot::Velocity.format(), TextureFormat::Rg16Float);
        assert_eq!(GBufferSlot::Metalness.format().components(), 1);
    }

    #[test]
    fn targets_fit_one_render_pass() {
        assert_eq!(GBufferSlot::ALL.len() as u32, radiance::GBUFFER_TARGETS);
        assert!(radiance::GBUFFER_TARGETS <= radiance::MAX_COLOR_ATTACHMENTS);
    }
}
