use std::sync::Arc;

use encase::ShaderSize;
use radiance::{
    util::bind_merge::BindGroupLayoutBuilder, Descriptors, PipelineRegistry, ResourceStateTracker, ShaderConfig,
    ShaderPreProcessor, TextureId,
};
use wgpu::{
    BindGroup, BindGroupLayout, BindingType, BufferBindingType, CommandEncoder, ComputePass, Device, Features,
    Queue, RenderPass, ShaderStages,
};

use crate::common::{
    LightConstants, MaterialConstants, ObjectConstants, PassConstants, Samplers, ShadowConstants, SsaoConstants,
    VoxelConstants,
};

pub const FRAME_GROUP: u32 = 0;
pub const TABLE_GROUP: u32 = 1;
pub const SAMPLER_GROUP: u32 = 2;
/// Group of the bindings a pass declares itself.
pub const PASS_GROUP: u32 = 3;

/// Layout of group 0: the constants of one frame ring slot.
pub struct FrameInterface {
    pub bgl: Arc<BindGroupLayout>,
}

impl FrameInterface {
    pub fn new(device: &Device) -> Self {
        profiling::scope!("FrameInterface::new");

        let stages = ShaderStages::VERTEX_FRAGMENT | ShaderStages::COMPUTE;
        let uniform = |size| BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: Some(size),
        };
        let storage = |size| BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: Some(size),
        };

        let bgl = BindGroupLayoutBuilder::new()
            .append(stages, uniform(PassConstants::SHADER_SIZE), None)
            .append(stages, storage(ObjectConstants::SHADER_SIZE), None)
            .append(stages, storage(MaterialConstants::SHADER_SIZE), None)
            .append(stages, storage(LightConstants::SHADER_SIZE), None)
            .append(stages, uniform(ShadowConstants::SHADER_SIZE), None)
            .append(stages, uniform(SsaoConstants::SHADER_SIZE), None)
            .append(stages, uniform(VoxelConstants::SHADER_SIZE), None)
            .build(device, Some("frame bgl"));

        Self { bgl: Arc::new(bgl) }
    }
}

/// Groups 0 and 2, which stay the same for every pass of a frame.
#[derive(Copy, Clone)]
pub struct UniversalBindings<'a> {
    pub frame: &'a BindGroup,
    pub samplers: &'a BindGroup,
}

impl<'a> UniversalBindings<'a> {
    pub fn bind_render<'p>(&self, rpass: &mut RenderPass<'p>, table: &'p BindGroup)
    where
        'a: 'p,
    {
        rpass.set_bind_group(FRAME_GROUP, self.frame, &[]);
        rpass.set_bind_group(TABLE_GROUP, table, &[]);
        rpass.set_bind_group(SAMPLER_GROUP, self.samplers, &[]);
    }

    pub fn bind_compute<'p>(&self, cpass: &mut ComputePass<'p>, table: &'p BindGroup)
    where
        'a: 'p,
    {
        cpass.set_bind_group(FRAME_GROUP, self.frame, &[]);
        cpass.set_bind_group(TABLE_GROUP, table, &[]);
        cpass.set_bind_group(SAMPLER_GROUP, self.samplers, &[]);
    }
}

/// Everything a pass needs to record into the frame's command list.
pub struct RecordContext<'a> {
    pub device: &'a Device,
    pub queue: &'a Queue,
    pub encoder: &'a mut CommandEncoder,
    pub descriptors: &'a mut Descriptors,
    pub registry: &'a PipelineRegistry,
    pub bindings: UniversalBindings<'a>,
    pub state: &'a mut ResourceStateTracker,
}

impl<'a> RecordContext<'a> {
    /// The resource table with the textures the pass writes hidden.
    pub fn table(&mut self, written: &[TextureId]) -> Arc<BindGroup> {
        self.descriptors.table.ready_excluding(self.device, written)
    }
}

/// Builds the layouts every pipeline starts with, in group order.
pub fn universal_layouts(frame: &FrameInterface, descriptors: &Descriptors, samplers: &Samplers) -> Vec<Arc<BindGroupLayout>> {
    vec![
        Arc::clone(&frame.bgl),
        Arc::clone(descriptors.table.layout()),
        Arc::clone(samplers.layout()),
    ]
}

/// What a pass needs to build its pipelines.
pub struct PassNewArgs<'a> {
    pub device: &'a Device,
    pub spp: &'a ShaderPreProcessor,
    pub shader_config: &'a ShaderConfig,
    pub registry: &'a PipelineRegistry,
    /// Features the device was created with.
    pub features: Features,
}
