use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use radiance::{
    BackBuffer, DepthBuffer, PipelineError, ResourceState, BACK_BUFFER_FORMAT, DEPTH_FORMAT,
    RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    ColorTargetState, ColorWrites, CompareFunction, DepthBiasState, DepthStencilState, FragmentState, LoadOp,
    MultisampleState, Operations, PrimitiveState, RenderPassColorAttachment, RenderPassDepthStencilAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, StencilState, StoreOp, VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext},
    RenderError,
};

const SKYBOX_PIPELINE: &str = "skybox";

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct SkyboxPush {
    environment: u32,
}

/// Fills every pixel no geometry covered with the environment cube.
pub struct SkyboxPass {
    pipeline: Arc<RenderPipeline>,
}

impl SkyboxPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("SkyboxPass::new");

        let sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/skybox.wgsl", args.shader_config)?;

        let pipeline = args.registry.create_render(
            args.device,
            SKYBOX_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("skybox pass"),
                layout: Some(args.registry.layout()),
                vertex: VertexState {
                    module: &sm,
                    entry_point: "vs_main",
                    buffers: &[],
                },
                primitive: PrimitiveState::default(),
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::LessEqual,
                    stencil: StencilState::default(),
                    bias: DepthBiasState::default(),
                }),
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

        Ok(Self { pipeline })
    }

    /// `environment` is the bindless index of the cube to draw.
    pub fn record(
        &self,
        ctx: &mut RecordContext<'_>,
        environment: u32,
        depth: &DepthBuffer,
        target: &BackBuffer,
    ) -> Result<(), RenderError> {
        profiling::scope!("SkyboxPass::record");

        ctx.state.require(target.texture.label(), ResourceState::RENDER_TARGET)?;
        ctx.state.require(depth.texture.label(), ResourceState::DEPTH_READ)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&[target.texture.id()]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("skybox"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(target.rtv),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: ctx.descriptors.view(depth.dsv),
                depth_ops: Some(Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(&self.pipeline);
        bindings.bind_render(&mut rpass, &table);
        rpass.set_push_constants(
            RENDER_PUSH_CONSTANT_STAGES,
            0,
            bytemuck::bytes_of(&SkyboxPush { environment }),
        );
        rpass.draw(0..3, 0..1);

        Ok(())
    }
}
