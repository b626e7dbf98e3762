use std::sync::Arc;

use radiance::util::bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder};
use wgpu::{
    AddressMode, BindGroup, BindGroupLayout, BindingType, CompareFunction, Device, FilterMode, Sampler,
    SamplerBindingType, SamplerDescriptor, ShaderStages,
};

/// The samplers every shader sees in group 2.
pub struct Samplers {
    pub linear_wrap: Sampler,
    pub linear_clamp: Sampler,
    pub point_clamp: Sampler,
    /// Bilinear less-or-equal comparison sampler for the shadow cascades.
    pub shadow: Sampler,
    /// Aniso 16 sampler for material textures.
    pub aniso_wrap: Sampler,
    bgl: Arc<BindGroupLayout>,
    bg: BindGroup,
}

impl Samplers {
    pub fn new(device: &Device) -> Self {
        profiling::scope!("Samplers::new");

        let linear_wrap = create_sampler(device, "linear wrap", AddressMode::Repeat, FilterMode::Linear, None, 1);
        let linear_clamp = create_sampler(
            device,
            "linear clamp",
            AddressMode::ClampToEdge,
            FilterMode::Linear,
            None,
            1,
        );
        let point_clamp = create_sampler(
            device,
            "point clamp",
            AddressMode::ClampToEdge,
            FilterMode::Nearest,
            None,
            1,
        );
        let shadow = create_sampler(
            device,
            "shadow",
            AddressMode::ClampToEdge,
            FilterMode::Linear,
            Some(CompareFunction::LessEqual),
            1,
        );
        let aniso_wrap = create_sampler(device, "aniso wrap", AddressMode::Repeat, FilterMode::Linear, None, 16);

        let mut bglb = BindGroupLayoutBuilder::new();
        Self::add_to_bgl(&mut bglb);
        let bgl = Arc::new(bglb.build(device, Some("samplers bgl")));

        let bg = BindGroupBuilder::new()
            .append_sampler(&linear_wrap)
            .append_sampler(&linear_clamp)
            .append_sampler(&point_clamp)
            .append_sampler(&shadow)
            .append_sampler(&aniso_wrap)
            .build(device, Some("samplers bg"), &bgl);

        Self {
            linear_wrap,
            linear_clamp,
            point_clamp,
            shadow,
            aniso_wrap,
            bgl,
            bg,
        }
    }

    /// Add the samplers to the given bind group layout builder, in binding order.
    pub fn add_to_bgl(bglb: &mut BindGroupLayoutBuilder) {
        let stages = ShaderStages::VERTEX_FRAGMENT | ShaderStages::COMPUTE;
        bglb.append(stages, BindingType::Sampler(SamplerBindingType::Filtering), None)
            .append(stages, BindingType::Sampler(SamplerBindingType::Filtering), None)
            .append(stages, BindingType::Sampler(SamplerBindingType::NonFiltering), None)
            .append(stages, BindingType::Sampler(SamplerBindingType::Comparison), None)
            .append(stages, BindingType::Sampler(SamplerBindingType::Filtering), None);
    }

    pub fn layout(&self) -> &Arc<BindGroupLayout> {
        &self.bgl
    }

    pub fn bind_group(&self) -> &BindGroup {
        &self.bg
    }
}

fn create_sampler(
    device: &Device,
    label: &str,
    address_mode: AddressMode,
    filter: FilterMode,
    compare: Option<CompareFunction>,
    anisotropy_clamp: u16,
) -> Sampler {
    device.create_sampler(&SamplerDescriptor {
        label: Some(label),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        lod_min_clamp: 0.0,
        lod_max_clamp: 100.0,
        compare,
        anisotropy_clamp,
        border_color: None,
    })
}
