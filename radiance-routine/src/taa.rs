//! Temporal antialiasing: sub-pixel jitter plus a reprojected, clamped history.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use radiance::{
    types::RenderSettings,
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        math::halton,
    },
    BackBuffer, DepthBuffer, Descriptor, Descriptors, PipelineError, ResourceState, ResourceStateTracker, Texture,
    TextureInfo, ViewDesc, BACK_BUFFER_FORMAT, RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    BindGroupLayout, BindingType, ColorTargetState, ColorWrites, CommandEncoder, Device, FragmentState, LoadOp,
    MultisampleState, Operations, PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderStages, StoreOp, TextureSampleType, TextureUsages, TextureViewDimension,
    VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext, PASS_GROUP},
    gbuffer::{GBuffer, GBufferSlot},
    RenderError, SetupError,
};

/// Length of the jitter sequence before it repeats.
pub const JITTER_PERIOD: u32 = 16;

const TAA_PIPELINE: &str = "taa";

/// Sub-pixel offset of sample `index` in NDC units for a `width` by `height` target.
pub fn jitter_offset(index: u32, width: u32, height: u32) -> Vec2 {
    let sample = Vec2::new(halton(index + 1, 2), halton(index + 1, 3)) - 0.5;
    Vec2::new(
        2.0 * sample.x / width.max(1) as f32,
        -2.0 * sample.y / height.max(1) as f32,
    )
}

/// Shifts a perspective projection by `jitter` NDC units.
pub fn jittered_projection(proj: Mat4, jitter: Vec2) -> Mat4 {
    let mut proj = proj;
    proj.z_axis.x += jitter.x;
    proj.z_axis.y += jitter.y;
    proj
}

/// What temporal accumulation does in one frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TemporalFrame {
    /// The resolve runs and projections are jittered.
    pub active: bool,
    /// No history exists, so nothing may read it and previous frame data is stale.
    pub first_frame: bool,
    pub jitter: Vec2,
    pub previous_jitter: Vec2,
}

/// Jitter sequence and history validity carried from frame to frame.
#[derive(Debug, Default, Clone)]
pub struct TemporalState {
    history_valid: bool,
    jitter_index: u32,
    jitter: Vec2,
}

impl TemporalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the history. The next active frame starts over.
    pub fn reset(&mut self) {
        if self.history_valid {
            log::debug!("Temporal history reset");
        }
        *self = Self::default();
    }

    pub fn history_valid(&self) -> bool {
        self.history_valid
    }

    /// Advances to the next frame. Any setting that makes the history
    /// meaningless resets it first.
    pub fn begin_frame(&mut self, settings: &RenderSettings, width: u32, height: u32) -> TemporalFrame {
        if !settings.taa_active() {
            self.reset();
            return TemporalFrame {
                active: false,
                first_frame: true,
                jitter: Vec2::ZERO,
                previous_jitter: Vec2::ZERO,
            };
        }

        let first_frame = !self.history_valid;
        let previous_jitter = self.jitter;
        self.jitter = jitter_offset(self.jitter_index, width, height);
        self.jitter_index = (self.jitter_index + 1) % JITTER_PERIOD;
        self.history_valid = true;

        TemporalFrame {
            active: true,
            first_frame,
            jitter: self.jitter,
            previous_jitter: if first_frame { self.jitter } else { previous_jitter },
        }
    }

    /// Closes the frame opened by [`Self::begin_frame`]. A frame that failed to
    /// record never wrote the history, so the next one has to start over.
    pub fn end_frame(&mut self, recorded: bool) {
        if !recorded {
            self.reset();
        }
    }
}

struct HistoryTexture {
    texture: Texture,
    srv: Descriptor,
}

/// Screen sized copies of the current frame and the accumulated history.
pub struct TaaTargets {
    source: HistoryTexture,
    history: HistoryTexture,
}

impl TaaTargets {
    pub fn new(device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) -> Result<Self, SetupError> {
        let mut create = |label: &str| -> Result<HistoryTexture, SetupError> {
            let info = TextureInfo::d2(
                width,
                height,
                BACK_BUFFER_FORMAT,
                TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            );
            let mut texture = Texture::create(device, label, info);
            let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
            Ok(HistoryTexture { texture, srv })
        };

        Ok(Self {
            source: create("taa source")?,
            history: create("taa history")?,
        })
    }

    pub fn register_states(&self, state: &mut ResourceStateTracker) {
        state.register(self.source.texture.label(), ResourceState::SHADER_RESOURCE);
        state.register(self.history.texture.label(), ResourceState::SHADER_RESOURCE);
    }

    pub fn textures(&self) -> impl Iterator<Item = &Texture> {
        [&self.source.texture, &self.history.texture].into_iter()
    }

    pub fn resize(&mut self, device: &Device, descriptors: &mut Descriptors, width: u32, height: u32) {
        for target in [&mut self.source, &mut self.history] {
            target.texture.resize(device, width, height);
            target.texture.rebuild_views(descriptors);
        }
    }
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct TaaPush {
    source: u32,
    history: u32,
    velocity: u32,
}

pub struct TaaPass {
    pipeline: Arc<RenderPipeline>,
    bgl: BindGroupLayout,
}

impl TaaPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("TaaPass::new");

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
            .build(args.device, Some("taa bgl"));

        let sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/taa.wgsl", args.shader_config)?;
        let layout = args.registry.layout_with(args.device, "taa pipeline layout", &bgl);

        let pipeline = args.registry.create_render(
            args.device,
            TAA_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("taa pass"),
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

    /// Blends the back buffer with the history and stores the result as the
    /// next frame's history. On the first frame the history is only seeded.
    pub fn record(
        &self,
        ctx: &mut RecordContext<'_>,
        frame: &TemporalFrame,
        gbuffer: &GBuffer,
        depth: &DepthBuffer,
        targets: &TaaTargets,
        back_buffer: &BackBuffer,
    ) -> Result<(), RenderError> {
        profiling::scope!("TaaPass::record");

        if frame.first_frame {
            copy_into(ctx, back_buffer, &targets.history.texture)?;
            return Ok(());
        }

        ctx.state.require(
            gbuffer.texture(GBufferSlot::Velocity).label(),
            ResourceState::PIXEL_SHADER_RESOURCE,
        )?;
        ctx.state.require(depth.texture.label(), ResourceState::DEPTH_READ)?;
        copy_into(ctx, back_buffer, &targets.source.texture)?;
        ctx.state
            .require(targets.history.texture.label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
        ctx.state.transition(back_buffer.texture.label(), ResourceState::RENDER_TARGET)?;

        let depth_bg = BindGroupBuilder::new()
            .append_texture_view(ctx.descriptors.view(depth.srv))
            .build(ctx.device, Some("taa depth bg"), &self.bgl);
        let push = TaaPush {
            source: targets.source.srv.index(),
            history: targets.history.srv.index(),
            velocity: gbuffer.srv_index(GBufferSlot::Velocity),
        };

        let bindings = ctx.bindings;
        let table = ctx.table(&[back_buffer.texture.id()]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("taa resolve"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(back_buffer.rtv),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(&self.pipeline);
        bindings.bind_render(&mut rpass, &table);
        rpass.set_bind_group(PASS_GROUP, &depth_bg, &[]);
        rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
        rpass.draw(0..3, 0..1);
        drop(rpass);

        copy_into(ctx, back_buffer, &targets.history.texture)
    }
}

/// Copies the back buffer into `dest`, leaving `dest` readable by pixel shaders
/// and the back buffer as a render target.
fn copy_into(ctx: &mut RecordContext<'_>, back_buffer: &BackBuffer, dest: &Texture) -> Result<(), RenderError> {
    ctx.state.transition(back_buffer.texture.label(), ResourceState::COPY_SOURCE)?;
    ctx.state.transition(dest.label(), ResourceState::COPY_DEST)?;
    copy_texture(ctx.encoder, &back_buffer.texture, dest);
    ctx.state.transition(dest.label(), ResourceState::PIXEL_SHADER_RESOURCE)?;
    ctx.state.transition(back_buffer.texture.label(), ResourceState::RENDER_TARGET)?;
    Ok(())
}

/// Whole-texture copy of mip 0 between two textures of the same size and format.
pub(crate) fn copy_texture(encoder: &mut CommandEncoder, source: &Texture, dest: &Texture) {
    encoder.copy_texture_to_texture(
        source.raw().as_image_copy(),
        dest.raw().as_image_copy(),
        source.info().extent(),
    );
}

#[cfg(test)]
mod tests {
    use radiance::types::Antialiasing;

    use super::*;

    fn taa_settings() -> RenderSettings {
        let mut settings = RenderSettings::default();
        settings.post.antialiasing = Antialiasing::Taa;
        settings.vxgi.debug_voxel = false;
        settings
    }

    #[test]
    fn jitter_stays_inside_a_pixel() {
        for index in 0..JITTER_PERIOD {
            let jitter = jitter_offset(index, 1280, 720);
            assert!(jitter.x.abs() <= 1.0 / 1280.0);
            assert!(jitter.y.abs() <= 1.0 / 720.0);
        }
        // Halton(1, 2) = 0.5 and Halton(1, 3) = 1/3.
        let first = jitter_offset(0, 100, 100);
        assert_eq!(first.x, 0.0);
        assert!((first.y - 2.0 * (0.5 - 1.0 / 3.0) / 100.0).abs() < 1e-6);
    }

    #[test]
    fn jittered_projection_shifts_ndc() {
        let proj = Mat4::perspective_lh(1.0, 1.5, 1.0, 100.0);
        let jitter = Vec2::new(0.01, -0.02);
        let point = glam::Vec4::new(1.0, 2.0, 10.0, 1.0);
        let a = proj * point;
        let b = jittered_projection(proj, jitter) * point;
        assert!((b.x / b.w - a.x / a.w - jitter.x).abs() < 1e-6);
        assert!((b.y / b.w - a.y / a.w - jitter.y).abs() < 1e-6);
        assert_eq!(a.z, b.z);
    }

    #[test]
    fn first_frame_after_reset_skips_history() {
        let settings = taa_settings();
        let mut state = TemporalState::new();

        let first = state.begin_frame(&settings, 64, 64);
        assert!(first.active);
        assert!(first.first_frame);
        assert_eq!(first.previous_jitter, first.jitter);

        let second = state.begin_frame(&settings, 64, 64);
        assert!(!second.first_frame);
        assert_eq!(second.previous_jitter, first.jitter);
        assert_ne!(second.jitter, first.jitter);

        state.reset();
        assert!(state.begin_frame(&settings, 64, 64).first_frame);
    }

    #[test]
    fn failed_frame_discards_history() {
        let settings = taa_settings();
        let mut state = TemporalState::new();

        state.begin_frame(&settings, 64, 64);
        state.end_frame(true);
        assert!(state.history_valid());
        assert!(!state.begin_frame(&settings, 64, 64).first_frame);

        state.end_frame(false);
        assert!(!state.history_valid());
        assert!(state.begin_frame(&settings, 64, 64).first_frame);
    }

    #[test]
    fn other_modes_reset_history() {
        let mut state = TemporalState::new();
        let mut settings = taa_settings();
        state.begin_frame(&settings, 64, 64);
        state.begin_frame(&settings, 64, 64);
        assert!(state.history_valid());

        settings.vxgi.debug_voxel = true;
        let frame = state.begin_frame(&settings, 64, 64);
        assert!(!frame.active);
        assert_eq!(frame.jitter, Vec2::ZERO);
        assert!(!state.history_valid());

        settings.vxgi.debug_voxel = false;
        settings.post.antialiasing = Antialiasing::Fxaa;
        assert!(!state.begin_frame(&settings, 64, 64).active);

        settings.post.antialiasing = Antialiasing::Taa;
        assert!(state.begin_frame(&settings, 64, 64).first_frame);
    }

    #[test]
    fn jitter_sequence_wraps() {
        let settings = taa_settings();
        let mut state = TemporalState::new();
        let jitters: Vec<_> = (0..=JITTER_PERIOD)
            .map(|_| state.begin_frame(&settings, 64, 64).jitter)
            .collect();
        assert_eq!(jitters[0], jitters[JITTER_PERIOD as usize]);
        assert_ne!(jitters[0], jitters[1]);
    }
}
