//! Image based lighting: the environment cube and the maps precomputed from it.
//!
//! Baking runs once per environment. An equirectangular HDR image is
//! reprojected into a mipmapped cube, which is then convolved into a diffuse
//! irradiance cube and a specular cube whose mips hold increasing roughness.
//! The split sum BRDF table does not depend on the environment.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use radiance::{
    types::ImageData,
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        math::dispatch_count,
        mipmap::MipmapGenerator,
    },
    Descriptor, Descriptors, PipelineError, ResourceState, ResourceStateTracker, Texture, TextureInfo, ViewDesc,
};
use wgpu::{
    BindGroup, BindGroupLayout, BindingType, Color, ColorTargetState, ColorWrites, ComputePassDescriptor,
    ComputePipeline, ComputePipelineDescriptor, Device, Extent3d, FragmentState, ImageCopyTexture, LoadOp,
    MultisampleState, Operations, Origin3d, PipelineLayout, PrimitiveState, RenderPassColorAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderStages, StorageTextureAccess, StoreOp,
    TextureAspect, TextureFormat, TextureSampleType, TextureUsages, TextureView, TextureViewDimension, VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext, PASS_GROUP},
    RenderError, SetupError,
};

pub const CUBE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const BRDF_LUT_FORMAT: TextureFormat = TextureFormat::Rg16Float;

/// Each invocation writes a 2x2 block of a 16x16 tile.
const TEXELS_PER_GROUP: u32 = 16;

const EQUIRECT_PIPELINE: &str = "equirect to cube";
const IRRADIANCE_PIPELINE: &str = "irradiance";
const PREFILTER_PIPELINE: &str = "prefilter";
const BRDF_LUT_PIPELINE: &str = "brdf lut";

/// Edge lengths of the baked maps.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IblSizes {
    pub environment: u32,
    pub irradiance: u32,
    pub brdf_lut: u32,
}

impl Default for IblSizes {
    fn default() -> Self {
        Self {
            environment: 1024,
            irradiance: 32,
            brdf_lut: 256,
        }
    }
}

/// Equirectangular HDR sky used when no environment image is given: a blue
/// gradient over a dim ground with a bright band at the horizon.
pub fn procedural_sky(width: u32, height: u32) -> ImageData {
    let zenith = Vec3::new(0.15, 0.3, 0.65);
    let horizon = Vec3::new(0.8, 0.85, 0.9);
    let ground = Vec3::new(0.12, 0.1, 0.08);

    let mut texels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        // +1 at the top row, -1 at the bottom.
        let elevation = 1.0 - 2.0 * (y as f32 + 0.5) / height as f32;
        let color = if elevation >= 0.0 {
            horizon.lerp(zenith, elevation.powf(0.5))
        } else {
            horizon.lerp(ground, (-elevation).powf(0.25))
        };
        for _ in 0..width {
            texels.extend_from_slice(&[color.x, color.y, color.z, 1.0]);
        }
    }

    ImageData {
        width,
        height,
        channels: 4,
        hdr: true,
        pixels: bytemuck::cast_slice(&texels).to_vec(),
    }
}

/// Roughness baked into mip `level` of a specular cube with `levels` mips.
pub fn prefilter_roughness(level: u32, levels: u32) -> f32 {
    if levels <= 1 {
        return 0.0;
    }
    level as f32 / (levels - 1) as f32
}

struct CubeMap {
    texture: Texture,
    srv: Descriptor,
}

impl CubeMap {
    fn new(
        device: &Device,
        descriptors: &mut Descriptors,
        label: &str,
        info: TextureInfo,
    ) -> Result<Self, SetupError> {
        let mut texture = Texture::create(device, label, info);
        let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::Cube))?;
        Ok(Self { texture, srv })
    }
}

/// The environment and every map baked from it.
pub struct IblMaps {
    environment: CubeMap,
    irradiance: CubeMap,
    prefiltered: CubeMap,
    brdf_lut: Texture,
    brdf_lut_rtv: Descriptor,
    brdf_lut_srv: Descriptor,
}

impl IblMaps {
    pub fn new(device: &Device, descriptors: &mut Descriptors, sizes: IblSizes) -> Result<Self, SetupError> {
        profiling::scope!("IblMaps::new");

        let storage = TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING;
        let environment = CubeMap::new(
            device,
            descriptors,
            "environment cube",
            TextureInfo::cube(
                sizes.environment,
                CUBE_FORMAT,
                storage | TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            )
            .with_full_mips(),
        )?;
        let irradiance = CubeMap::new(
            device,
            descriptors,
            "irradiance cube",
            TextureInfo::cube(sizes.irradiance, CUBE_FORMAT, storage),
        )?;
        let prefiltered = CubeMap::new(
            device,
            descriptors,
            "prefiltered cube",
            TextureInfo::cube(sizes.environment, CUBE_FORMAT, storage | TextureUsages::COPY_DST).with_full_mips(),
        )?;

        let mut brdf_lut = Texture::create(
            device,
            "brdf lut",
            TextureInfo::d2(
                sizes.brdf_lut,
                sizes.brdf_lut,
                BRDF_LUT_FORMAT,
                TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            ),
        );
        let brdf_lut_rtv = brdf_lut.create_view(descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;
        let brdf_lut_srv = brdf_lut.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;

        Ok(Self {
            environment,
            irradiance,
            prefiltered,
            brdf_lut,
            brdf_lut_rtv,
            brdf_lut_srv,
        })
    }

    pub fn environment_index(&self) -> u32 {
        self.environment.srv.index()
    }

    pub fn irradiance_index(&self) -> u32 {
        self.irradiance.srv.index()
    }

    pub fn prefiltered_index(&self) -> u32 {
        self.prefiltered.srv.index()
    }

    pub fn brdf_lut_index(&self) -> u32 {
        self.brdf_lut_srv.index()
    }

    pub fn prefiltered_mips(&self) -> u32 {
        self.prefiltered.texture.info().mip_level_count
    }

    pub fn register_states(&self, state: &mut ResourceStateTracker) {
        for texture in [
            &self.environment.texture,
            &self.irradiance.texture,
            &self.prefiltered.texture,
            &self.brdf_lut,
        ] {
            state.register(texture.label(), ResourceState::SHADER_RESOURCE);
        }
    }
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct IblPush {
    source: u32,
    roughness: f32,
}

pub struct IblPass {
    equirect: Arc<ComputePipeline>,
    irradiance: Arc<ComputePipeline>,
    prefilter: Arc<ComputePipeline>,
    brdf_lut: Arc<RenderPipeline>,
    equirect_bgl: BindGroupLayout,
    target_bgl: BindGroupLayout,
}

impl IblPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("IblPass::new");

        let cube_target = BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format: CUBE_FORMAT,
            view_dimension: TextureViewDimension::D2Array,
        };
        let equirect_bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::COMPUTE,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                None,
            )
            .append(ShaderStages::COMPUTE, cube_target, None)
            .build(args.device, Some("equirect bgl"));
        let target_bgl = BindGroupLayoutBuilder::new()
            .append(ShaderStages::COMPUTE, cube_target, None)
            .build(args.device, Some("cube target bgl"));

        let equirect_layout = args
            .registry
            .compute_layout_with(args.device, "equirect pipeline layout", &equirect_bgl);
        let target_layout = args
            .registry
            .compute_layout_with(args.device, "cube target pipeline layout", &target_bgl);

        let compute = |name: &str, shader: &str, layout: &PipelineLayout| -> Result<Arc<ComputePipeline>, PipelineError> {
            let sm = args.spp.create_shader_module(args.device, shader, args.shader_config)?;
            args.registry.create_compute(
                args.device,
                name,
                &ComputePipelineDescriptor {
                    label: Some(name),
                    layout: Some(layout),
                    module: &sm,
                    entry_point: "cs_main",
                },
            )
        };
        let equirect = compute(EQUIRECT_PIPELINE, "radiance-routine/equirect_to_cube.wgsl", &equirect_layout)?;
        let irradiance = compute(IRRADIANCE_PIPELINE, "radiance-routine/irradiance.wgsl", &target_layout)?;
        let prefilter = compute(PREFILTER_PIPELINE, "radiance-routine/prefilter.wgsl", &target_layout)?;

        let lut_sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/brdf_lut.wgsl", args.shader_config)?;
        let brdf_lut = args.registry.create_render(
            args.device,
            BRDF_LUT_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some(BRDF_LUT_PIPELINE),
                layout: Some(args.registry.layout()),
                vertex: VertexState {
                    module: &lut_sm,
                    entry_point: "vs_main",
                    buffers: &[],
                },
                primitive: PrimitiveState::default(),
                depth_stencil: None,
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    module: &lut_sm,
                    entry_point: "fs_main",
                    targets: &[Some(ColorTargetState {
                        format: BRDF_LUT_FORMAT,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                multiview: None,
            },
        )?;

        Ok(Self {
            equirect,
            irradiance,
            prefilter,
            brdf_lut,
            equirect_bgl,
            target_bgl,
        })
    }

    /// Records the whole bake from `equirect`, an `Rgba32Float` texture.
    pub fn bake(
        &self,
        ctx: &mut RecordContext<'_>,
        mipmaps: &MipmapGenerator,
        equirect: &Texture,
        maps: &IblMaps,
    ) -> Result<(), RenderError> {
        profiling::scope!("IblPass::bake");

        for texture in [&maps.environment.texture, &maps.irradiance.texture, &maps.prefiltered.texture] {
            ctx.state.transition(texture.label(), ResourceState::UNORDERED_ACCESS)?;
        }

        self.project_environment(ctx, mipmaps, equirect, maps)?;
        self.convolve(ctx, maps)?;
        self.integrate_brdf(ctx, maps)?;

        for texture in [&maps.environment.texture, &maps.irradiance.texture, &maps.prefiltered.texture] {
            ctx.state.transition(texture.label(), ResourceState::SHADER_RESOURCE)?;
        }
        log::info!(
            "Baked image based lighting from {} ({} specular mips)",
            equirect.label(),
            maps.prefiltered_mips()
        );
        Ok(())
    }

    fn project_environment(
        &self,
        ctx: &mut RecordContext<'_>,
        mipmaps: &MipmapGenerator,
        equirect: &Texture,
        maps: &IblMaps,
    ) -> Result<(), RenderError> {
        let environment = &maps.environment.texture;
        let bindings = ctx.bindings;
        let table = ctx.table(&[environment.id()]);

        let bg = {
            let mut heap = ctx.descriptors.table.heap_mut().mark();
            let (_, source) = equirect.scratch_view(
                &mut heap,
                ViewDesc::SampledRaw {
                    dimension: TextureViewDimension::D2,
                },
            )?;
            let (_, target) = environment.scratch_view(&mut heap, ViewDesc::Storage { mip: 0 })?;
            BindGroupBuilder::new()
                .append_texture_view(&source)
                .append_texture_view(&target)
                .build(ctx.device, Some("equirect bg"), &self.equirect_bgl)
        };

        let mut cpass = ctx.encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("equirect to cube"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.equirect);
        bindings.bind_compute(&mut cpass, &table);
        cpass.set_bind_group(PASS_GROUP, &bg, &[]);
        let groups = dispatch_count(environment.info().width, TEXELS_PER_GROUP);
        cpass.dispatch_workgroups(groups, groups, 6);
        drop(cpass);

        mipmaps.generate_mipmaps(ctx.device, ctx.encoder, environment)?;
        Ok(())
    }

    fn convolve(&self, ctx: &mut RecordContext<'_>, maps: &IblMaps) -> Result<(), RenderError> {
        let irradiance = &maps.irradiance.texture;
        let prefiltered = &maps.prefiltered.texture;
        let levels = prefiltered.info().mip_level_count;

        // The sharpest specular level is the environment itself.
        ctx.encoder.copy_texture_to_texture(
            ImageCopyTexture {
                texture: maps.environment.texture.raw(),
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            ImageCopyTexture {
                texture: prefiltered.raw(),
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            Extent3d {
                width: prefiltered.info().width,
                height: prefiltered.info().height,
                depth_or_array_layers: 6,
            },
        );

        let bindings = ctx.bindings;
        let table = ctx.table(&[irradiance.id(), prefiltered.id()]);

        let (irradiance_bg, prefilter_bgs) = {
            let mut heap = ctx.descriptors.table.heap_mut().mark();
            let (_, irradiance_view) = irradiance.scratch_view(&mut heap, ViewDesc::Storage { mip: 0 })?;
            let irradiance_bg = self.target_bg(ctx.device, &irradiance_view);
            let prefilter_bgs = (1..levels)
                .map(|mip| {
                    let (_, view) = prefiltered.scratch_view(&mut heap, ViewDesc::Storage { mip })?;
                    Ok(self.target_bg(ctx.device, &view))
                })
                .collect::<Result<Vec<_>, RenderError>>()?;
            (irradiance_bg, prefilter_bgs)
        };

        let source = maps.environment.srv.index();
        let mut cpass = ctx.encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("ibl convolution"),
            timestamp_writes: None,
        });
        bindings.bind_compute(&mut cpass, &table);

        cpass.set_pipeline(&self.irradiance);
        cpass.set_bind_group(PASS_GROUP, &irradiance_bg, &[]);
        cpass.set_push_constants(0, bytemuck::bytes_of(&IblPush { source, roughness: 0.0 }));
        let groups = dispatch_count(irradiance.info().width, TEXELS_PER_GROUP);
        cpass.dispatch_workgroups(groups, groups, 6);

        cpass.set_pipeline(&self.prefilter);
        for (index, bg) in prefilter_bgs.iter().enumerate() {
            let mip = index as u32 + 1;
            let push = IblPush {
                source,
                roughness: prefilter_roughness(mip, levels),
            };
            cpass.set_bind_group(PASS_GROUP, bg, &[]);
            cpass.set_push_constants(0, bytemuck::bytes_of(&push));
            let groups = dispatch_count(prefiltered.info().mip_width(mip), TEXELS_PER_GROUP);
            cpass.dispatch_workgroups(groups, groups, 6);
        }

        Ok(())
    }

    fn integrate_brdf(&self, ctx: &mut RecordContext<'_>, maps: &IblMaps) -> Result<(), RenderError> {
        ctx.state.transition(maps.brdf_lut.label(), ResourceState::RENDER_TARGET)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&[maps.brdf_lut.id()]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("brdf lut"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(maps.brdf_lut_rtv),
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
        rpass.set_pipeline(&self.brdf_lut);
        bindings.bind_render(&mut rpass, &table);
        rpass.draw(0..3, 0..1);
        drop(rpass);

        ctx.state.transition(maps.brdf_lut.label(), ResourceState::SHADER_RESOURCE)?;
        Ok(())
    }

    fn target_bg(&self, device: &Device, view: &TextureView) -> BindGroup {
        BindGroupBuilder::new()
            .append_texture_view(view)
            .build(device, Some("cube target bg"), &self.target_bgl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roughness_spans_the_mip_chain() {
        assert_eq!(prefilter_roughness(0, 11), 0.0);
        assert_eq!(prefilter_roughness(10, 11), 1.0);
        assert!((prefilter_roughness(5, 11) - 0.5).abs() < 1e-6);
        assert_eq!(prefilter_roughness(0, 1), 0.0);
    }

    #[test]
    fn procedural_sky_is_bright_above_and_dark_below() {
        let sky = procedural_sky(16, 8);
        assert!(sky.hdr);
        assert_eq!(sky.pixels.len(), sky.byte_size());

        let texels: &[f32] = bytemuck::cast_slice(&sky.pixels);
        let luminance = |row: u32| {
            let i = (row * 16 * 4) as usize;
            texels[i] + texels[i + 1] + texels[i + 2]
        };
        assert!(luminance(0) < luminance(3));
        assert!(luminance(7) < luminance(4));
        assert!(texels.iter().all(|v| v.is_finite() && *v >= 0.0));
    }
}
