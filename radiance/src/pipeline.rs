//! Named registry of every pipeline the renderer uses.

use std::sync::Arc;

use parking_lot::RwLock;
use wgpu::{
    BindGroupLayout, ComputePipeline, ComputePipelineDescriptor, Device, PipelineLayout, PipelineLayoutDescriptor,
    PushConstantRange, RenderPipeline, RenderPipelineDescriptor, ShaderStages,
};

use crate::{
    util::{
        error_scope::ErrorScope,
        typedefs::{FastHashMap, SsoString},
    },
    PipelineError,
};

/// Bytes of push constants every pipeline layout reserves.
pub const PUSH_CONSTANT_SIZE: u32 = 128;
/// Stages the push constant range of render layouts is visible to. Render
/// passes must set push constants with exactly these stages.
pub const RENDER_PUSH_CONSTANT_STAGES: ShaderStages = ShaderStages::VERTEX_FRAGMENT;

enum Pipeline {
    Render(Arc<RenderPipeline>),
    Compute(Arc<ComputePipeline>),
}

/// Compiles pipelines once and hands them out by name.
///
/// Nearly every pipeline shares one universal layout: the frame constants, the
/// bindless resource table and the samplers, followed by an optional per pass
/// group, plus [`PUSH_CONSTANT_SIZE`] bytes of push constants through which
/// draws select resources by their table index.
pub struct PipelineRegistry {
    universal_bgls: Vec<Arc<BindGroupLayout>>,
    universal: Arc<PipelineLayout>,
    pipelines: RwLock<FastHashMap<SsoString, Pipeline>>,
}

impl PipelineRegistry {
    pub fn new(device: &Device, universal_bgls: Vec<Arc<BindGroupLayout>>) -> Self {
        profiling::scope!("PipelineRegistry::new");

        let universal = Arc::new(create_layout(
            device,
            "universal pipeline layout",
            &universal_bgls,
            None,
            RENDER_PUSH_CONSTANT_STAGES,
        ));
        Self {
            universal_bgls,
            universal,
            pipelines: RwLock::new(FastHashMap::default()),
        }
    }

    /// The shared layout with no per pass group.
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.universal
    }

    /// The shared layout followed by `extra` as the per pass group.
    pub fn layout_with(&self, device: &Device, label: &str, extra: &BindGroupLayout) -> PipelineLayout {
        create_layout(
            device,
            label,
            &self.universal_bgls,
            Some(extra),
            RENDER_PUSH_CONSTANT_STAGES,
        )
    }

    pub fn compute_layout_with(&self, device: &Device, label: &str, extra: &BindGroupLayout) -> PipelineLayout {
        create_layout(device, label, &self.universal_bgls, Some(extra), ShaderStages::COMPUTE)
    }

    pub fn create_render(
        &self,
        device: &Device,
        name: &str,
        desc: &RenderPipelineDescriptor<'_>,
    ) -> Result<Arc<RenderPipeline>, PipelineError> {
        profiling::scope!("PipelineRegistry::create_render");

        let scope = ErrorScope::new(device);
        let pipeline = Arc::new(device.create_render_pipeline(desc));
        scope.end().map_err(|e| PipelineError::PipelineCreation {
            name: name.into(),
            reason: e.to_string(),
        })?;

        log::debug!("Created render pipeline {name}");
        self.insert(name, Pipeline::Render(Arc::clone(&pipeline)));
        Ok(pipeline)
    }

    pub fn create_compute(
        &self,
        device: &Device,
        name: &str,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> Result<Arc<ComputePipeline>, PipelineError> {
        profiling::scope!("PipelineRegistry::create_compute");

        let scope = ErrorScope::new(device);
        let pipeline = Arc::new(device.create_compute_pipeline(desc));
        scope.end().map_err(|e| PipelineError::PipelineCreation {
            name: name.into(),
            reason: e.to_string(),
        })?;

        log::debug!("Created compute pipeline {name}");
        self.insert(name, Pipeline::Compute(Arc::clone(&pipeline)));
        Ok(pipeline)
    }

    fn insert(&self, name: &str, pipeline: Pipeline) {
        if self.pipelines.write().insert(name.into(), pipeline).is_some() {
            log::warn!("Pipeline {name} registered twice, keeping the latest");
        }
    }

    pub fn render(&self, name: &str) -> Result<Arc<RenderPipeline>, PipelineError> {
        match self.pipelines.read().get(name) {
            Some(Pipeline::Render(pipeline)) => Ok(Arc::clone(pipeline)),
            Some(Pipeline::Compute(_)) => Err(PipelineError::WrongPipelineKind(name.into())),
            None => Err(PipelineError::MissingPipeline(name.into())),
        }
    }

    pub fn compute(&self, name: &str) -> Result<Arc<ComputePipeline>, PipelineError> {
        match self.pipelines.read().get(name) {
            Some(Pipeline::Compute(pipeline)) => Ok(Arc::clone(pipeline)),
            Some(Pipeline::Render(_)) => Err(PipelineError::WrongPipelineKind(name.into())),
            None => Err(PipelineError::MissingPipeline(name.into())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.read().contains_key(name)
    }

    /// Names of every registered pipeline, sorted.
    pub fn names(&self) -> Vec<SsoString> {
        let mut names: Vec<_> = self.pipelines.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

fn create_layout(
    device: &Device,
    label: &str,
    universal: &[Arc<BindGroupLayout>],
    extra: Option<&BindGroupLayout>,
    stages: ShaderStages,
) -> PipelineLayout {
    let bind_group_layouts: Vec<&BindGroupLayout> = universal.iter().map(|bgl| &**bgl).chain(extra).collect();
    device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &bind_group_layouts,
        push_constant_ranges: &[PushConstantRange {
            stages,
            range: 0..PUSH_CONSTANT_SIZE,
        }],
    })
}
