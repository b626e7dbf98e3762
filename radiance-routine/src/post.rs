//! Full screen post processing, ping-ponging between two scratch targets.

use std::sync::Arc;

use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use radiance::{
    types::{Antialiasing, PostSettings},
    BackBuffer, Descriptor, Descriptors, PipelineError, ResourceState, ResourceStateTracker, Texture, TextureInfo,
    ViewDesc, BACK_BUFFER_FORMAT, RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    Color, ColorTargetState, ColorWrites, Device, FragmentState, LoadOp, MultisampleState, Operations,
    PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    StoreOp, TextureUsages, TextureViewDimension, VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext},
    gbuffer::{GBuffer, GBufferSlot},
    taa::copy_texture,
    RenderError, SetupError,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PostEffect {
    MotionBlur,
    Fxaa,
    ToneMap,
}

impl PostEffect {
    fn pipeline_name(self) -> &'static str {
        match self {
            Self::MotionBlur => "motion blur",
            Self::Fxaa => "fxaa",
            Self::ToneMap => "tone map",
        }
    }

    fn shader(self) -> &'static str {
        match self {
            Self::MotionBlur => "radiance-routine/motion_blur.wgsl",
            Self::Fxaa => "radiance-routine/fxaa.wgsl",
            Self::ToneMap => "radiance-routine/tonemap.wgsl",
        }
    }
}

/// Where a post step reads from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PostSource {
    BackBuffer,
    Scratch(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PostStep {
    pub effect: PostEffect,
    pub source: PostSource,
    /// Scratch target written.
    pub target: usize,
}

/// The enabled effects of a frame in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostChain {
    steps: ArrayVec<PostStep, 3>,
}

impl PostChain {
    pub fn steps(&self) -> &[PostStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Scratch target holding the final image, copied back into the back buffer.
    pub fn output(&self) -> Option<usize> {
        self.steps.last().map(|step| step.target)
    }
}

/// Chains motion blur, FXAA and tone mapping, skipping the disabled ones.
pub fn plan_post_chain(settings: &PostSettings) -> PostChain {
    let effects = [
        (PostEffect::MotionBlur, settings.motion_blur),
        (PostEffect::Fxaa, settings.antialiasing == Antialiasing::Fxaa),
        (PostEffect::ToneMap, settings.tone_mapping),
    ];

    let mut chain = PostChain::default();
    let mut source = PostSource::BackBuffer;
    let mut target = 0;
    for (effect, _) in effects.into_iter().filter(|(_, enabled)| *enabled) {
        chain.steps.push(PostStep { effect, source, target });
        source = PostSource::Scratch(target);
        target = 1 - target;
    }
    chain
}

struct ScratchTarget {
    texture: Texture,
    rtv: Descriptor,
    srv: Descriptor,
}

/// The two screen sized ping-pong textures.
pub struct PostTargets {
    scratch: [ScratchTarget; 2],
}

impl PostTargets {
    pub fn new(device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) -> Result<Self, SetupError> {
        let mut create = |label: &str| -> Result<ScratchTarget, SetupError> {
            let info = TextureInfo::d2(
                width,
                height,
                BACK_BUFFER_FORMAT,
                TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
            );
            let mut texture = Texture::create(device, label, info);
            let rtv = texture.create_view(descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;
            let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
            Ok(ScratchTarget { texture, rtv, srv })
        };

        Ok(Self {
            scratch: [create("post scratch 0")?, create("post scratch 1")?],
        })
    }

    pub fn register_states(&self, state: &mut ResourceStateTracker) {
        for target in &self.scratch {
            state.register(target.texture.label(), ResourceState::SHADER_RESOURCE);
        }
    }

    pub fn textures(&self) -> impl Iterator<Item = &Texture> {
        self.scratch.iter().map(|target| &target.texture)
    }

    pub fn resize(&mut self, device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) {
        for target in &mut self.scratch {
            target.texture.resize(device, width, height);
            target.texture.rebuild_views(descriptors);
        }
    }
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct PostPush {
    source: u32,
    velocity: u32,
    amount: f32,
}

pub struct PostPass {
    motion_blur: Arc<RenderPipeline>,
    fxaa: Arc<RenderPipeline>,
    tone_map: Arc<RenderPipeline>,
}

impl PostPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("PostPass::new");

        let create = |effect: PostEffect| -> Result<Arc<RenderPipeline>, PipelineError> {
            let sm = args
                .spp
                .create_shader_module(args.device, effect.shader(), args.shader_config)?;
            args.registry.create_render(
                args.device,
                effect.pipeline_name(),
                &RenderPipelineDescriptor {
                    label: Some(effect.pipeline_name()),
                    layout: Some(args.registry.layout()),
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
            )
        };

        Ok(Self {
            motion_blur: create(PostEffect::MotionBlur)?,
            fxaa: create(PostEffect::Fxaa)?,
            tone_map: create(PostEffect::ToneMap)?,
        })
    }

    fn pipeline(&self, effect: PostEffect) -> &RenderPipeline {
        match effect {
            PostEffect::MotionBlur => &self.motion_blur,
            PostEffect::Fxaa => &self.fxaa,
            PostEffect::ToneMap => &self.tone_map,
        }
    }

    /// Runs every step of `chain` and copies the result back into the back buffer.
    pub fn record(
        &self,
        ctx: &mut RecordContext<'_>,
        chain: &PostChain,
        settings: &PostSettings,
        gbuffer: &GBuffer,
        targets: &PostTargets,
        back_buffer: &BackBuffer,
    ) -> Result<(), RenderError> {
        profiling::scope!("PostPass::record");

        let Some(output) = chain.output() else {
            return Ok(());
        };

        ctx.state.transition(back_buffer.texture.label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
        ctx.state.require(
            gbuffer.texture(GBufferSlot::Velocity).label(),
            ResourceState::PIXEL_SHADER_RESOURCE,
        )?;

        for step in chain.steps() {
            let source = match step.source {
                PostSource::BackBuffer => back_buffer.srv,
                PostSource::Scratch(index) => targets.scratch[index].srv,
            };
            let push = PostPush {
                source: source.index(),
                velocity: gbuffer.srv_index(GBufferSlot::Velocity),
                amount: settings.motion_blur_amount,
            };
            let target = &targets.scratch[step.target];
            ctx.state.transition(target.texture.label(), ResourceState::RENDER_TARGET)?;

            let bindings = ctx.bindings;
            let table = ctx.table(&[target.texture.id()]);
            let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some(step.effect.pipeline_name()),
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
            rpass.set_pipeline(self.pipeline(step.effect));
            bindings.bind_render(&mut rpass, &table);
            rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
            rpass.draw(0..3, 0..1);
            drop(rpass);

            ctx.state
                .transition(target.texture.label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
        }

        let result = &targets.scratch[output].texture;
        ctx.state.transition(result.label(), ResourceState::COPY_SOURCE)?;
        ctx.state.transition(back_buffer.texture.label(), ResourceState::COPY_DEST)?;
        copy_texture(ctx.encoder, result, &back_buffer.texture);
        ctx.state.transition(result.label(), ResourceState::SHADER_RESOURCE)?;
        ctx.state.transition(back_buffer.texture.label(), ResourceState::RENDER_TARGET)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(antialiasing: Antialiasing, motion_blur: bool, tone_mapping: bool) -> PostSettings {
        PostSettings {
            antialiasing,
            motion_blur,
            tone_mapping,
            ..PostSettings::default()
        }
    }

    #[test]
    fn nothing_enabled_means_no_copy() {
        let chain = plan_post_chain(&settings(Antialiasing::Taa, false, false));
        assert!(chain.is_empty());
        assert_eq!(chain.output(), None);
    }

    #[test]
    fn single_stage_reads_the_back_buffer() {
        let chain = plan_post_chain(&settings(Antialiasing::None, false, true));
        assert_eq!(
            chain.steps(),
            [PostStep {
                effect: PostEffect::ToneMap,
                source: PostSource::BackBuffer,
                target: 0,
            }]
        );
        assert_eq!(chain.output(), Some(0));
    }

    #[test]
    fn full_chain_ping_pongs() {
        let chain = plan_post_chain(&settings(Antialiasing::Fxaa, true, true));
        let effects: Vec<_> = chain.steps().iter().map(|step| step.effect).collect();
        assert_eq!(effects, [PostEffect::MotionBlur, PostEffect::Fxaa, PostEffect::ToneMap]);

        let sources: Vec<_> = chain.steps().iter().map(|step| step.source).collect();
        assert_eq!(
            sources,
            [PostSource::BackBuffer, PostSource::Scratch(0), PostSource::Scratch(1)]
        );
        let targets: Vec<_> = chain.steps().iter().map(|step| step.target).collect();
        assert_eq!(targets, [0, 1, 0]);
        assert_eq!(chain.output(), Some(0));
    }

    #[test]
    fn fxaa_only_runs_without_taa() {
        let with_taa = plan_post_chain(&settings(Antialiasing::Taa, true, true));
        assert!(with_taa.steps().iter().all(|step| step.effect != PostEffect::Fxaa));
        assert_eq!(with_taa.output(), Some(1));
    }
}
