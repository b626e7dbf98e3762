//! Cascaded shadow maps for the sun.

use std::sync::Arc;

use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use radiance::{
    types::ShadowSettings, Descriptor, Descriptors, PipelineError, ResourceState, Texture, TextureInfo, ViewDesc,
    RENDER_PUSH_CONSTANT_STAGES,
};
use wgpu::{
    CompareFunction, DepthBiasState, DepthStencilState, Device, FrontFace, LoadOp, MultisampleState, Operations,
    PolygonMode, PrimitiveState, PrimitiveTopology, RenderPassDepthStencilAttachment, RenderPassDescriptor,
    RenderPipeline, RenderPipelineDescriptor, StencilState, StoreOp, TextureFormat, TextureUsages,
    TextureViewDimension, VertexState,
};

use crate::{
    common::{Camera, PassNewArgs, RecordContext, ShadowConstants, CASCADE_COUNT, VERTEX_LAYOUT},
    scene::Scene,
    RenderError, SetupError,
};

pub const SHADOW_FORMAT: TextureFormat = TextureFormat::Depth32Float;
const SHADOW_PIPELINE: &str = "shadow";

/// Splits `[near, max_shadow_distance]` into cascades whose depth ranges grow
/// geometrically by `cascade_range_scale`. The first entry is `near`, the last
/// the maximum shadow distance.
pub fn cascade_ends(near: f32, settings: &ShadowSettings) -> [f32; CASCADE_COUNT + 1] {
    let mut scales = [0.0; CASCADE_COUNT];
    let mut scale = 1.0;
    for s in &mut scales {
        *s = scale;
        scale *= settings.cascade_range_scale;
    }
    let total: f32 = scales.iter().sum();

    let mut ends = [near; CASCADE_COUNT + 1];
    let mut cumulative = 0.0;
    for (i, s) in scales.iter().enumerate() {
        cumulative += s / total;
        ends[i + 1] = cumulative * settings.max_shadow_distance;
    }
    ends
}

/// Light matrices of every cascade for one frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Cascades {
    pub view_proj: [Mat4; CASCADE_COUNT],
    /// Radius of each cascade's bounding sphere.
    pub radius: [f32; CASCADE_COUNT],
    pub ends: [f32; CASCADE_COUNT + 1],
}

impl Cascades {
    /// Fits an orthographic light frustum around the bounding sphere of each
    /// cascade's slice of the camera frustum.
    ///
    /// Sphere centers are snapped to whole shadow map texels in light space,
    /// so the maps stay stable while the camera moves.
    pub fn compute(camera: &Camera, light_dir: Vec3, settings: &ShadowSettings, map_size: u32) -> Self {
        profiling::scope!("Cascades::compute");

        let dir = light_dir.normalize_or_zero();
        let dir = if dir == Vec3::ZERO { Vec3::NEG_Y } else { dir };
        let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let light_rotation = Mat4::look_to_lh(Vec3::ZERO, dir, up);
        let inv_light_rotation = light_rotation.inverse();

        let ends = cascade_ends(camera.near_z(), settings);
        let mut view_proj = [Mat4::IDENTITY; CASCADE_COUNT];
        let mut radius = [0.0; CASCADE_COUNT];

        for i in 0..CASCADE_COUNT {
            let (near, far) = cascade_range(&ends, i, settings.cascade_transition_ratio);
            let (center, r) = bounding_sphere(camera, near, far);

            let texel = 2.0 * r / map_size as f32;
            let mut center_ls = light_rotation.transform_point3(center);
            center_ls.x = (center_ls.x / texel).floor() * texel;
            center_ls.y = (center_ls.y / texel).floor() * texel;
            let center = inv_light_rotation.transform_point3(center_ls);

            let back = 50.0 + center.length();
            let light_view = Mat4::look_at_lh(center - dir * back, center, up);
            let proj = Mat4::orthographic_lh(-r, r, -r, r, 0.0, 2.0 * back);

            view_proj[i] = proj * light_view;
            radius[i] = r;
        }

        Self { view_proj, radius, ends }
    }

    pub fn constants(&self, settings: &ShadowSettings, map_size: u32) -> ShadowConstants {
        ShadowConstants {
            view_proj: self.view_proj,
            radius: Vec4::from_array(self.radius),
            cascade_ends: Vec4::new(self.ends[1], self.ends[2], self.ends[3], self.ends[4]),
            cascade_start: self.ends[0],
            transition_ratio: settings.cascade_transition_ratio,
            softness: settings.shadow_softness,
            num_samples: settings.num_samples,
            show_cascades: settings.show_cascades as u32,
            use_vogel: settings.use_vogel_disk_sample as u32,
            texel_size: 1.0 / map_size as f32,
        }
    }
}

/// Depth range cascade `i` renders: its own slice, extended back into the
/// previous cascade so the two can be blended.
fn cascade_range(ends: &[f32; CASCADE_COUNT + 1], i: usize, transition_ratio: f32) -> (f32, f32) {
    let mut near = ends[i];
    if i > 0 {
        near -= (ends[i] - ends[i - 1]) * transition_ratio;
    }
    (near, ends[i + 1])
}

/// The 8 corners of the camera frustum between `near` and `far` in world space.
/// Corner `x * 4 + y * 2 + z` has NDC coordinates `(2x - 1, 2y - 1, z)`.
fn frustum_corners(camera: &Camera, near: f32, far: f32) -> [Vec3; 8] {
    let proj = Mat4::perspective_lh(camera.fov_y(), camera.aspect(), near, far);
    let inv = (proj * camera.view()).inverse();

    let mut corners = [Vec3::ZERO; 8];
    for (index, corner) in corners.iter_mut().enumerate() {
        let x = (index >> 2) as f32 * 2.0 - 1.0;
        let y = ((index >> 1) & 1) as f32 * 2.0 - 1.0;
        let z = (index & 1) as f32;
        *corner = inv.project_point3(Vec3::new(x, y, z));
    }
    corners
}

/// Sphere centered on the view axis passing through every corner of the slice.
fn bounding_sphere(camera: &Camera, near: f32, far: f32) -> (Vec3, f32) {
    let corners = frustum_corners(camera, near, far);
    let near_diagonal2 = (corners[6] - corners[0]).length_squared();
    let far_diagonal2 = (corners[7] - corners[1]).length_squared();
    let length = far - near;

    let x = length * 0.5 - (near_diagonal2 - far_diagonal2) / (8.0 * length);
    let center = camera.position() + camera.look() * (near + x);
    let radius = (x * x + near_diagonal2 * 0.25).sqrt();
    (center, radius)
}

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct ShadowPush {
    object_index: u32,
    cascade: u32,
}

/// Depth array with one layer per cascade.
pub struct CascadedShadowMap {
    texture: Texture,
    layers: ArrayVec<Descriptor, CASCADE_COUNT>,
    srv: Descriptor,
}

impl CascadedShadowMap {
    pub fn new(device: &Device, descriptors: &mut Descriptors, size: u32) -> Result<Self, SetupError> {
        let info = TextureInfo::d2(
            size,
            size,
            SHADOW_FORMAT,
            TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
        )
        .with_layers(CASCADE_COUNT as u32);
        let mut texture = Texture::create(device, "cascaded shadow map", info);

        let mut layers = ArrayVec::new();
        for layer in 0..CASCADE_COUNT as u32 {
            layers.push(texture.create_view(descriptors, ViewDesc::DepthStencil { layer })?);
        }
        let srv = texture.create_view(
            descriptors,
            ViewDesc::SampledRaw {
                dimension: TextureViewDimension::D2Array,
            },
        )?;

        Ok(Self {
            texture,
            layers,
            srv,
        })
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Depth comparison view of every cascade.
    pub fn srv(&self) -> Descriptor {
        self.srv
    }
}

pub struct ShadowPass {
    pipeline: Arc<RenderPipeline>,
}

impl ShadowPass {
    pub fn new(args: &PassNewArgs<'_>) -> Result<Self, PipelineError> {
        profiling::scope!("ShadowPass::new");

        let sm = args
            .spp
            .create_shader_module(args.device, "radiance-routine/shadow.wgsl", args.shader_config)?;

        let pipeline = args.registry.create_render(
            args.device,
            SHADOW_PIPELINE,
            &RenderPipelineDescriptor {
                label: Some("shadow pass"),
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
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(DepthStencilState {
                    format: SHADOW_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: CompareFunction::Less,
                    stencil: StencilState::default(),
                    bias: DepthBiasState {
                        constant: 100_000,
                        slope_scale: 1.0,
                        clamp: 10.0,
                    },
                }),
                multisample: MultisampleState::default(),
                fragment: None,
                multiview: None,
            },
        )?;

        Ok(Self { pipeline })
    }

    /// Renders the depth of every render item into each cascade layer.
    pub fn record(&self, ctx: &mut RecordContext<'_>, scene: &Scene, map: &CascadedShadowMap) -> Result<(), RenderError> {
        profiling::scope!("ShadowPass::record");

        ctx.state.transition(map.texture.label(), ResourceState::DEPTH_WRITE)?;

        let bindings = ctx.bindings;
        let table = ctx.table(&[]);
        for (cascade, &dsv) in map.layers.iter().enumerate() {
            let mut rpass = ctx.encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("shadow cascade"),
                color_attachments: &[],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: ctx.descriptors.view(dsv),
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
                let push = ShadowPush {
                    object_index: call.object_index,
                    cascade: cascade as u32,
                };
                rpass.set_push_constants(RENDER_PUSH_CONSTANT_STAGES, 0, bytemuck::bytes_of(&push));
            });
        }

        ctx.state.transition(map.texture.label(), ResourceState::SHADER_RESOURCE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> Camera {
        let mut camera = Camera::new();
        camera.set_lens(0.25 * std::f32::consts::PI, 16.0 / 9.0, 1.0, 1000.0);
        camera.set_position(Vec3::new(-2.29, 5.11, 1.15));
        camera.rotate_y(0.7);
        camera.pitch(0.2);
        camera.update_view_matrix();
        camera
    }

    #[test]
    fn cascade_ends_grow_to_max_distance() {
        let settings = ShadowSettings::default();
        let ends = cascade_ends(1.0, &settings);
        assert_eq!(ends[0], 1.0);
        assert!((ends[CASCADE_COUNT] - settings.max_shadow_distance).abs() < 1e-3);
        for pair in ends.windows(2) {
            assert!(pair[0] < pair[1], "{ends:?}");
        }

        let first = ends[2] - ends[1];
        let second = ends[3] - ends[2];
        assert!((second / first - settings.cascade_range_scale).abs() < 1e-4);
    }

    #[test]
    fn sphere_touches_every_corner() {
        let camera = test_camera();
        for (near, far) in [(1.0, 7.0), (5.0, 40.0), (30.0, 100.0)] {
            let (center, radius) = bounding_sphere(&camera, near, far);
            for corner in frustum_corners(&camera, near, far) {
                let distance = (corner - center).length();
                assert!((distance - radius).abs() < radius * 1e-3, "{distance} vs {radius}");
            }
        }
    }

    #[test]
    fn light_frustum_is_centered_on_the_cascade() {
        let camera = test_camera();
        let settings = ShadowSettings::default();
        let dir = Vec3::new(0.3, -1.0, 0.2).normalize();
        let cascades = Cascades::compute(&camera, dir, &settings, 2048);

        for i in 0..CASCADE_COUNT {
            let (near, far) = cascade_range(&cascades.ends, i, settings.cascade_transition_ratio);
            let (center, radius) = bounding_sphere(&camera, near, far);
            let ndc = cascades.view_proj[i].project_point3(center);
            let texel_ndc = 2.0 * 2.0 / 2048.0;
            assert!(ndc.x.abs() <= texel_ndc * 1.5 && ndc.y.abs() <= texel_ndc * 1.5, "cascade {i}: {ndc}");
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
            assert!((cascades.radius[i] - radius).abs() < radius * 1e-4);
        }
    }

    #[test]
    fn straight_down_light_stays_finite() {
        let camera = test_camera();
        let cascades = Cascades::compute(&camera, Vec3::NEG_Y, &ShadowSettings::default(), 1024);
        assert!(cascades.view_proj.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn constants_split_ends_from_start() {
        let camera = test_camera();
        let settings = ShadowSettings::default();
        let cascades = Cascades::compute(&camera, Vec3::new(-0.5, -0.7, 0.1), &settings, 4096);
        let constants = cascades.constants(&settings, 4096);
        assert_eq!(constants.cascade_start, 1.0);
        assert_eq!(constants.cascade_ends.w, cascades.ends[4]);
        assert_eq!(constants.texel_size, 1.0 / 4096.0);
        assert_eq!(constants.use_vogel, 1);
    }
}
