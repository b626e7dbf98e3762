//! Voxel global illumination.
//!
//! The lit scene is rasterized into an atomic accumulation buffer along the
//! three axes of a cube around it, averaged into a radiance volume, filtered
//! down its mip chain, and optionally relit from itself into a second volume.
//! Lighting then cone traces whichever volume is current.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use radiance::{
    types::VxgiSettings,
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        math::dispatch_count,
    },
    BackBuffer, DepthBuffer, Descriptor, Descriptors, PipelineError, ResourceState, ResourceStateTracker, Texture,
    TextureInfo, ViewDesc, BACK_BUFFER_FORMAT, DEPTH_FORMAT, RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    BindGroup, BindGroupLayout, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages, Color,
    ColorTargetState, ColorWrites, CompareFunction, ComputePass, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, DepthBiasState, DepthStencilState, Device, Features, FragmentState, FrontFace, LoadOp,
    MultisampleState, Operations, PipelineLayout, PolygonMode, PrimitiveState, PrimitiveTopology,
    RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderStages, StencilState, StorageTextureAccess, StoreOp, TextureFormat,
    TextureSampleType, TextureUsages, TextureViewDimension, VertexState,
};

use crate::{
    common::{PassNewArgs, RecordContext, VoxelConstants, PASS_GROUP, VERTEX_LAYOUT},
    scene::{Aabb, Scene},
    shadow::CascadedShadowMap,
    RenderError, SetupError,
};

pub const VOXEL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Red, green, blue and fragment count, one `u32` each.
const ACCUMULATOR_BYTES: u64 = 16;
const GROUP_SIZE: u32 = 8;
/// Half extent of the volume when the scene is empty.
const DEFAULT_HALF_EXTENT: f32 = 50.0;
/// Room left around the scene bounds.
const BOUNDS_MARGIN: f32 = 1.1;

const VOXELIZE_PIPELINE: &str = "voxelize";
const VOXEL_COPY_PIPELINE: &str = "voxel copy";
const VOXEL_BOUNCE_PIPELINE: &str = "voxel bounce";
const VOXEL_MIPMAP_PIPELINE: &str = "voxel mipmap";
const VOXEL_DEBUG_PIPELINE: &str = "voxel debug";

/// World space cube the volume covers.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VoxelBounds {
    pub world_min: Vec3,
    pub extent: f32,
}

impl VoxelBounds {
    /// Smallest cube around `bounds`, grown by a margin.
    pub fn fit(bounds: &Aabb) -> Self {
        if bounds.is_empty() {
            return Self {
                world_min: Vec3::splat(-DEFAULT_HALF_EXTENT),
                extent: 2.0 * DEFAULT_HALF_EXTENT,
            };
        }

        let extent = (bounds.size().max_element() * BOUNDS_MARGIN).max(1.0);
        Self {
            world_min: bounds.center() - Vec3::splat(extent * 0.5),
            extent,
        }
    }

    pub fn center(&self) -> Vec3 {
        self.world_min + Vec3::splat(self.extent * 0.5)
    }

    /// Orthographic projections looking down the X, Y and Z axes, each covering the whole cube.
    pub fn axis_view_proj(&self) -> [Mat4; 3] {
        let half = self.extent * 0.5;
        let center = self.center();
        let proj = Mat4::orthographic_lh(-half, half, -half, half, 0.0, self.extent);
        [(Vec3::X, Vec3::Y), (Vec3::Y, Vec3::Z), (Vec3::Z, Vec3::Y)]
            .map(|(dir, up)| proj * Mat4::look_to_lh(center - dir * half, dir, up))
    }

    pub fn constants(&self, dimension: u32, mip_count: u32, settings: &VxgiSettings) -> VoxelConstants {
        VoxelConstants {
            view_proj: self.axis_view_proj(),
            world_min: self.world_min,
            voxel_size: self.extent / dimension as f32,
            dimension,
            mip_count,
            debug_mip: settings.debug_voxel_mip_level.min(mip_count - 1),
            second_bounce: settings.second_bounce as u32,
        }
    }
}

struct VoxelVolume {
    texture: Texture,
    srv: Descriptor,
    /// One bind group per mip above zero, reading the mip before it.
    mip_bgs: Vec<BindGroup>,
}

/// The accumulation buffer and both radiance volumes.
pub struct VoxelGrid {
    dimension: u32,
    accumulator: Buffer,
    volumes: [VoxelVolume; 2],
    /// Writes into mip 0 of each volume.
    write_bgs: [BindGroup; 2],
    /// Rasterization target of the voxelization. Nothing is written to it.
    dummy: Texture,
    dummy_rtv: Descriptor,
}

impl VoxelGrid {
    pub fn new(
        device: &Device,
        descriptors: &mut Descriptors,
        pass: &VxgiPass,
        dimension: u32,
    ) -> Result<Self, SetupError> {
        profiling::scope!("VoxelGrid::new");

        let accumulator = device.create_buffer(&BufferDescriptor {
            label: Some("voxel accumulator"),
            size: (dimension as u64).pow(3) * ACCUMULATOR_BYTES,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut create_volume = |label: &str| -> Result<VoxelVolume, SetupError> {
            let info = TextureInfo::d3(
                dimension,
                VOXEL_FORMAT,
                TextureUsages::TEXTURE_BINDING | TextureUsages::STORAGE_BINDING,
            )
            .with_full_mips();
            let mut texture = Texture::create(device, label, info);
            let srv = texture.create_view(descriptors, ViewDesc::sampled(TextureViewDimension::D3))?;

            let mip_bgs = (1..info.mip_level_count)
                .map(|mip| {
                    let (source, _) = texture.raw_view(ViewDesc::Sampled {
                        dimension: TextureViewDimension::D3,
                        base_mip: mip - 1,
                        mip_count: Some(1),
                    });
                    let (destination, _) = texture.raw_view(ViewDesc::Storage { mip });
                    BindGroupBuilder::new()
                        .append_texture_view(&source)
                        .append_texture_view(&destination)
                        .build(device, Some(&format!("{label} mip {mip}")), &pass.mip_bgl)
                })
                .collect();

            Ok(VoxelVolume { texture, srv, mip_bgs })
        };
        let volumes = [create_volume("voxel radiance")?, create_volume("voxel bounce radiance")?];

        let write_bgs = [&volumes[0], &volumes[1]].map(|volume| {
            let (mip0, _) = volume.texture.raw_view(ViewDesc::Storage { mip: 0 });
            BindGroupBuilder::new()
                .append_buffer(&accumulator)
                .append_texture_view(&mip0)
                .build(device, Some(&format!("{} write", volume.texture.label())), &pass.write_bgl)
        });

        let mut dummy = Texture::create(
            device,
            "voxelization target",
            TextureInfo::d2(dimension, dimension, TextureFormat::R8Unorm, TextureUsages::RENDER_ATTACHMENT),
        );
        let dummy_rtv = dummy.create_view(descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;

        log::info!(
            "Voxel grid {dimension}^3 with {} mips",
            volumes[0].texture.info().mip_level_count
        );

        Ok(Self {
            dimension,
            accumulator,
            volumes,
            write_bgs,
            dummy,
            dummy_rtv,
        })
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn mip_count(&self) -> u32 {
        self.volumes[0].texture.info().mip_level_count
    }

    /// Bindless index of the volume lighting traces.
    pub fn radiance_index(&self, second_bounce: bool) -> u32 {
        self.volumes[second_bounce as usize].srv.index()
    }

    pub fn register_states(&self, state: &mut ResourceStateTracker) {
        for volume in &self.volumes {
            state.register(volume.texture.label(), ResourceState::SHADER_RESOURCE);
        }
    }
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct DrawPush {
    object_index: u32,
    material_index: u32,
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct BouncePush {
    first_bounce: u32,
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct DebugPush {
    volume: u32,
    mip: u32,
}

pub struct VxgiPass {
    voxelize: Arc<RenderPipeline>,
    copy: Arc<ComputePipeline>,
    bounce: Arc<ComputePipeline>,
    mipmap: Arc<ComputePipeline>,
    debug: Arc<RenderPipeline>,
    voxelize_bgl: BindGroupLayout,
    write_bgl: BindGroupLayout,
    mip_bgl: BindGroupLayout,
}

impl VxgiPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("VxgiPass::new");

        let accumulator_entry = BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let storage_entry = BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format: VOXEL_FORMAT,
            view_dimension: TextureViewDimension::D3,
        };

        let voxelize_bgl = BindGroupLayoutBuilder::new()
            .append(ShaderStages::FRAGMENT, accumulator_entry, None)
            .append(
                ShaderStages::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    view_dimension: TextureViewDimension::D2Array,
                    multisampled: false,
                },
                None,
            )
            .build(args.device, Some("voxelize bgl"));
        let write_bgl = BindGroupLayoutBuilder::new()
            .append(ShaderStages::COMPUTE, accumulator_entry, None)
            .append(ShaderStages::COMPUTE, storage_entry, None)
            .build(args.device, Some("voxel write bgl"));
        let mip_bgl = BindGroupLayoutBuilder::new()
            .append(
                ShaderStages::COMPUTE,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D3,
                    multisampled: false,
                },
                None,
            )
            .append(ShaderStages::COMPUTE, storage_entry, None)
            .build(args.device, Some("voxel mipmap bgl"));

        let conservative = args.features.contains(Features::CONSERVATIVE_RASTERIZATION);
        if !conservative {
            log::info!("Conservative rasterization unavailable, thin geometry may leave holes in the voxel grid");
        }

        let voxelize_sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/voxelize.wgsl", args.shader_config)?;
        let voxelize_layout = args
            .registry
            .layout_with(args.device, "voxelize pipeline layout", &voxelize_bgl);
        let voxelize = args.registry.create_render(
            args.device,
            VOXELIZE_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("voxelize pass"),
                layout: Some(&voxelize_layout),
                vertex: VertexState {
                    module: &voxelize_sm,
                    entry_point: "vs_main",
                    buffers: &[VERTEX_LAYOUT.clone()],
                },
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: FrontFace::Cw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: PolygonMode::Fill,
                    conservative,
                },
                depth_stencil: None,
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    module: &voxelize_sm,
                    entry_point: "fs_main",
                    targets: &[Some(ColorTargetState {
                        format: TextureFormat::R8Unorm,
                        blend: None,
                        write_mask: ColorWrites::empty(),
                    })],
                }),
                multiview: None,
            },
        )?;

        let write_layout = args
            .registry
            .compute_layout_with(args.device, "voxel write pipeline layout", &write_bgl);
        let mip_layout = args
            .registry
            .compute_layout_with(args.device, "voxel mipmap pipeline layout", &mip_bgl);
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
        let copy = compute(VOXEL_COPY_PIPELINE, "radiance-routine/voxel_copy.wgsl", &write_layout)?;
        let bounce = compute(VOXEL_BOUNCE_PIPELINE, "radiance-routine/voxel_bounce.wgsl", &write_layout)?;
        let mipmap = compute(VOXEL_MIPMAP_PIPELINE, "radiance-routine/voxel_mipmap.wgsl", &mip_layout)?;

        let debug_sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/voxel_debug.wgsl", args.shader_config)?;
        let debug = args.registry.create_render(
            args.device,
            VOXEL_DEBUG_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("voxel debug pass"),
                layout: Some(args.registry.layout()),
                vertex: VertexState {
                    module: &debug_sm,
                    entry_point: "vs_main",
                    buffers: &[],
                },
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::PointList,
                    ..PrimitiveState::default()
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
                    module: &debug_sm,
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

        Ok(Self {
            voxelize,
            copy,
            bounce,
            mipmap,
            debug,
            voxelize_bgl,
            write_bgl,
            mip_bgl,
        })
    }

    /// Clears the accumulator and rasterizes every render item into it, once per axis.
    pub fn voxelize(
        &self,
        ctx: &mut RecordContext<'_>,
        scene: &Scene,
        shadow_map: &CascadedShadowMap,
        grid: &VoxelGrid,
    ) -> Result<(), RenderError> {
        profiling::scope!("VxgiPass::voxelize");

        ctx.state
            .require(shadow_map.texture().label(), ResourceState::SHADER_RESOURCE)?;

        ctx.encoder.clear_buffer(&grid.accumulator, 0, None);

        let pass_bg = BindGroupBuilder::new()
            .append_buffer(&grid.accumulator)
            .append_texture_view(ctx.descriptors.view(shadow_map.srv()))
            .build(ctx.device, Some("voxelize bg"), &self.voxelize_bgl);

        let bindings = ctx.bindings;
        let table = ctx.table(&[]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some(grid.dummy.label()),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(grid.dummy_rtv),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::TRANSPARENT),
                    store: StoreOp::Discard,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(&self.voxelize);
        bindings.bind_render(&mut rpass, &table);
        rpass.set_bind_group(PASS_GROUP, &pass_bg, &[]);
        scene.record_draws(&mut rpass, 0..3, |rpass, call| {
            let push = DrawPush {
                object_index: call.object_index,
                material_index: call.material_index,
            };
            rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
        });

        Ok(())
    }

    /// Averages the accumulator into mip 0 of the first volume.
    pub fn copy(&self, ctx: &mut RecordContext<'_>, grid: &VoxelGrid) -> Result<(), RenderError> {
        profiling::scope!("VxgiPass::copy");
        self.write_volume(ctx, grid, 0, &self.copy, None)
    }

    /// Relights the first volume from itself into mip 0 of the second.
    pub fn bounce(&self, ctx: &mut RecordContext<'_>, grid: &VoxelGrid) -> Result<(), RenderError> {
        profiling::scope!("VxgiPass::bounce");

        ctx.state
            .require(grid.volumes[0].texture.label(), ResourceState::SHADER_RESOURCE)?;
        let push = BouncePush {
            first_bounce: grid.volumes[0].srv.index(),
        };
        self.write_volume(ctx, grid, 1, &self.bounce, Some(bytemuck::bytes_of(&push)))
    }

    fn write_volume(
        &self,
        ctx: &mut RecordContext<'_>,
        grid: &VoxelGrid,
        volume: usize,
        pipeline: &ComputePipeline,
        push: Option<&[u8]>,
    ) -> Result<(), RenderError> {
        let target = &grid.volumes[volume];
        ctx.state.transition(target.texture.label(), ResourceState::UNORDERED_ACCESS)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&[target.texture.id()]);
        let mut cpass = ctx.encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some(target.texture.label()),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        bindings.bind_compute(&mut cpass, &table);
        cpass.set_bind_group(PASS_GROUP, &grid.write_bgs[volume], &[]);
        if let Some(push) = push {
            cpass.set_push_constants(0, push);
        }
        dispatch_volume(&mut cpass, grid.dimension);

        // Stays writable until its mip chain is generated.
        Ok(())
    }

    /// Box filters mip 0 of a volume down to its last mip.
    pub fn generate_mips(&self, ctx: &mut RecordContext<'_>, grid: &VoxelGrid, second: bool) -> Result<(), RenderError> {
        profiling::scope!("VxgiPass::generate_mips");

        let volume = &grid.volumes[second as usize];
        ctx.state.transition(volume.texture.label(), ResourceState::UNORDERED_ACCESS)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&[volume.texture.id()]);
        let mut cpass = ctx.encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("voxel mipmaps"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.mipmap);
        bindings.bind_compute(&mut cpass, &table);
        for (index, bg) in volume.mip_bgs.iter().enumerate() {
            let mip = index as u32 + 1;
            cpass.set_bind_group(PASS_GROUP, bg, &[]);
            dispatch_volume(&mut cpass, (grid.dimension >> mip).max(1));
        }
        drop(cpass);

        ctx.state.transition(volume.texture.label(), ResourceState::SHADER_RESOURCE)?;
        Ok(())
    }

    /// Draws one point per filled voxel of the selected mip straight into the back buffer.
    pub fn debug_draw(
        &self,
        ctx: &mut RecordContext<'_>,
        grid: &VoxelGrid,
        settings: &VxgiSettings,
        depth: &DepthBuffer,
        target: &BackBuffer,
    ) -> Result<(), RenderError> {
        profiling::scope!("VxgiPass::debug_draw");

        ctx.state.transition(target.texture.label(), ResourceState::RENDER_TARGET)?;
        ctx.state.transition(depth.texture.label(), ResourceState::DEPTH_WRITE)?;

        let mip = settings.debug_voxel_mip_level.min(grid.mip_count() - 1);
        let push = DebugPush {
            volume: grid.radiance_index(settings.second_bounce),
            mip,
        };
        let dim = (grid.dimension >> mip).max(1);

        let bindings = ctx.bindings;
        let table = ctx.table(&[target.texture.id()]);
        let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("voxel debug"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: ctx.descriptors.view(target.rtv),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::BLACK),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: ctx.descriptors.view(depth.dsv),
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_pipeline(&self.debug);
        bindings.bind_render(&mut rpass, &table);
        rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
        rpass.draw(0..dim * dim * dim, 0..1);
        drop(rpass);

        ctx.state.transition(depth.texture.label(), ResourceState::DEPTH_READ)?;
        Ok(())
    }
}

/// Each invocation covers 8 consecutive slices of an 8x8 tile.
fn dispatch_volume(cpass: &mut ComputePass<'_>, size: u32) {
    let groups = dispatch_count(size, GROUP_SIZE);
    cpass.dispatch_workgroups(groups, groups, groups);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_inside_clip(point: Vec3) {
        assert!(point.x.abs() <= 1.0 + 1e-4 && point.y.abs() <= 1.0 + 1e-4, "{point}");
        assert!(point.z >= -1e-4 && point.z <= 1.0 + 1e-4, "{point}");
    }

    #[test]
    fn empty_scene_gets_default_volume() {
        let bounds = VoxelBounds::fit(&Aabb::EMPTY);
        assert_eq!(bounds.world_min, Vec3::splat(-50.0));
        assert_eq!(bounds.extent, 100.0);
        assert_eq!(bounds.center(), Vec3::ZERO);
    }

    #[test]
    fn volume_is_a_cube_around_the_scene() {
        let scene = Aabb {
            min: Vec3::new(-10.0, 0.0, -2.0),
            max: Vec3::new(30.0, 5.0, 2.0),
        };
        let bounds = VoxelBounds::fit(&scene);
        assert!((bounds.extent - 44.0).abs() < 1e-4);
        assert!((bounds.center() - scene.center()).length() < 1e-4);

        let max = bounds.world_min + Vec3::splat(bounds.extent);
        assert!(bounds.world_min.cmple(scene.min).all());
        assert!(max.cmpge(scene.max).all());
    }

    #[test]
    fn every_axis_projection_covers_the_cube() {
        let bounds = VoxelBounds::fit(&Aabb {
            min: Vec3::new(-3.0, -1.0, 4.0),
            max: Vec3::new(5.0, 2.0, 9.0),
        });
        for view_proj in bounds.axis_view_proj() {
            for corner in 0..8 {
                let offset = Vec3::new((corner & 1) as f32, ((corner >> 1) & 1) as f32, (corner >> 2) as f32);
                let point = bounds.world_min + offset * bounds.extent;
                assert_inside_clip(view_proj.project_point3(point));
            }
            assert_inside_clip(view_proj.project_point3(bounds.center()));
        }
    }

    #[test]
    fn constants_clamp_debug_mip() {
        let bounds = VoxelBounds::fit(&Aabb::EMPTY);
        let settings = VxgiSettings {
            debug_voxel_mip_level: 20,
            ..VxgiSettings::default()
        };
        let constants = bounds.constants(128, 8, &settings);
        assert_eq!(constants.debug_mip, 7);
        assert_eq!(constants.voxel_size, 100.0 / 128.0);
        assert_eq!(constants.second_bounce, 1);
    }
}
