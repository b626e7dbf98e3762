//! Layouts of the constant and structured buffers, mirrored by `common.wgsl`.

use encase::ShaderType;
use glam::{Mat4, Vec2, Vec3, Vec4};
use radiance::{
    types::{Light, MaterialData},
    util::math::halton,
};

pub const CASCADE_COUNT: usize = 4;
pub const SSAO_SAMPLE_COUNT: usize = 14;
/// Largest gaussian radius the blur weights hold.
pub const SSAO_MAX_BLUR_RADIUS: usize = 5;
/// Marks an absent bindless texture.
pub const INVALID_INDEX: u32 = u32::MAX;

#[derive(Debug, Default, Copy, Clone, PartialEq, ShaderType)]
pub struct PassConstants {
    pub view: Mat4,
    pub inv_view: Mat4,
    pub proj: Mat4,
    pub inv_proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub prev_view_proj: Mat4,
    pub proj_tex: Mat4,
    pub eye_pos: Vec3,
    pub near_z: f32,
    pub render_target_size: Vec2,
    pub inv_render_target_size: Vec2,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
    pub enable_gi: u32,
    pub jitter: Vec2,
    pub previous_jitter: Vec2,
}

#[derive(Debug, Copy, Clone, PartialEq, ShaderType)]
pub struct ObjectConstants {
    pub world: Mat4,
    /// World matrix of the previous frame, for motion vectors.
    pub prev_world: Mat4,
}

impl Default for ObjectConstants {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            prev_world: Mat4::IDENTITY,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, ShaderType)]
pub struct MaterialConstants {
    pub ambient: Vec4,
    pub albedo: Vec4,
    pub metalness: f32,
    pub roughness: f32,
    pub albedo_texture: u32,
    pub normal_texture: u32,
    pub metalness_texture: u32,
    pub roughness_texture: u32,
    pub transparent: u32,
}

/// Bindless indices of a material's textures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaterialTextures {
    pub albedo: Option<u32>,
    pub normal: Option<u32>,
    pub metalness: Option<u32>,
    pub roughness: Option<u32>,
}

impl MaterialConstants {
    pub fn new(material: &MaterialData, textures: MaterialTextures, transparent: bool) -> Self {
        Self {
            ambient: material.ambient,
            albedo: material.albedo,
            metalness: material.metalness,
            roughness: material.roughness,
            albedo_texture: textures.albedo.unwrap_or(INVALID_INDEX),
            normal_texture: textures.normal.unwrap_or(INVALID_INDEX),
            metalness_texture: textures.metalness.unwrap_or(INVALID_INDEX),
            roughness_texture: textures.roughness.unwrap_or(INVALID_INDEX),
            transparent: transparent as u32,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, ShaderType)]
pub struct LightConstants {
    pub position_ws: Vec4,
    pub direction_ws: Vec4,
    pub position_vs: Vec4,
    pub direction_vs: Vec4,
    pub color: Vec4,
    pub spotlight_angle: f32,
    pub range: f32,
    pub intensity: f32,
    pub enabled: u32,
    pub selected: u32,
    pub ty: u32,
}

impl From<&Light> for LightConstants {
    fn from(light: &Light) -> Self {
        Self {
            position_ws: light.position_ws,
            direction_ws: light.direction_ws,
            position_vs: light.position_vs,
            direction_vs: light.direction_vs,
            color: light.color,
            spotlight_angle: light.spotlight_angle,
            range: light.range,
            intensity: light.intensity,
            enabled: light.enabled as u32,
            selected: light.selected as u32,
            ty: light.ty as u32,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, ShaderType)]
pub struct ShadowConstants {
    pub view_proj: [Mat4; CASCADE_COUNT],
    /// Bounding sphere radius of each cascade.
    pub radius: Vec4,
    /// View space depth at which each cascade ends.
    pub cascade_ends: Vec4,
    pub cascade_start: f32,
    pub transition_ratio: f32,
    pub softness: f32,
    pub num_samples: u32,
    pub show_cascades: u32,
    pub use_vogel: u32,
    pub texel_size: f32,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, ShaderType)]
pub struct SsaoConstants {
    pub proj: Mat4,
    pub inv_proj: Mat4,
    pub proj_tex: Mat4,
    pub offsets: [Vec4; SSAO_SAMPLE_COUNT],
    pub blur_weights: [Vec4; 3],
    pub inv_render_target_size: Vec2,
    pub occlusion_radius: f32,
    pub fade_start: f32,
    pub fade_end: f32,
    pub surface_epsilon: f32,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, ShaderType)]
pub struct VoxelConstants {
    /// Orthographic projections along the X, Y and Z axes of the volume.
    pub view_proj: [Mat4; 3],
    pub world_min: Vec3,
    pub voxel_size: f32,
    pub dimension: u32,
    pub mip_count: u32,
    pub debug_mip: u32,
    pub second_bounce: u32,
}

/// Maps NDC to texture space: x from [-1, 1] to [0, 1], y flipped.
pub fn ndc_to_texture() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.5, 0.5, 0.0, 1.0),
    )
}

/// The 8 cube corners followed by the 6 face centers, each scaled to a length in [0.25, 1.0].
pub fn ssao_offsets() -> [Vec4; SSAO_SAMPLE_COUNT] {
    let directions = [
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(-1.0, -1.0, -1.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, -1.0),
        Vec3::new(1.0, 1.0, -1.0),
        Vec3::new(-1.0, -1.0, 1.0),
        Vec3::new(-1.0, 1.0, -1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, 1.0),
    ];

    let mut offsets = [Vec4::ZERO; SSAO_SAMPLE_COUNT];
    for (i, (offset, direction)) in offsets.iter_mut().zip(directions).enumerate() {
        let length = 0.25 + 0.75 * halton(i as u32 + 1, 5);
        *offset = (direction.normalize() * length).extend(0.0);
    }
    offsets
}

/// Normalized gaussian weights of radius `ceil(2 * sigma)`, centered in an 11 tap window.
pub fn gauss_weights(sigma: f32) -> [f32; 2 * SSAO_MAX_BLUR_RADIUS + 1] {
    let two_sigma2 = 2.0 * sigma * sigma;
    let radius = ((2.0 * sigma).ceil() as usize).min(SSAO_MAX_BLUR_RADIUS);
    let center = SSAO_MAX_BLUR_RADIUS;

    let mut weights = [0.0; 2 * SSAO_MAX_BLUR_RADIUS + 1];
    let mut sum = 0.0;
    for offset in 0..=radius {
        let x = offset as f32;
        let weight = (-x * x / two_sigma2).exp();
        weights[center + offset] = weight;
        weights[center - offset] = weight;
        sum += if offset == 0 { weight } else { 2.0 * weight };
    }
    for weight in &mut weights {
        *weight /= sum;
    }
    weights
}

/// Packs the 11 blur weights into the three vec4 the shader reads.
pub fn pack_blur_weights(weights: &[f32; 2 * SSAO_MAX_BLUR_RADIUS + 1]) -> [Vec4; 3] {
    let mut packed = [0.0f32; 12];
    packed[..weights.len()].copy_from_slice(weights);
    [
        Vec4::from_slice(&packed[0..4]),
        Vec4::from_slice(&packed[4..8]),
        Vec4::from_slice(&packed[8..12]),
    ]
}

#[cfg(test)]
mod tests {
    use encase::ShaderSize;

    use super::*;

    #[test]
    fn constant_sizes_match_wgsl() {
        assert_eq!(PassConstants::SHADER_SIZE.get(), 576);
        assert_eq!(ObjectConstants::SHADER_SIZE.get(), 128);
        assert_eq!(MaterialConstants::SHADER_SIZE.get(), 64);
        assert_eq!(LightConstants::SHADER_SIZE.get(), 112);
        assert_eq!(ShadowConstants::SHADER_SIZE.get(), 320);
        assert_eq!(SsaoConstants::SHADER_SIZE.get(), 496);
        assert_eq!(VoxelConstants::SHADER_SIZE.get(), 224);
    }

    #[test]
    fn gauss_weights_are_normalized_and_symmetric() {
        let weights = gauss_weights(2.5);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for offset in 1..=SSAO_MAX_BLUR_RADIUS {
            assert_eq!(weights[SSAO_MAX_BLUR_RADIUS - offset], weights[SSAO_MAX_BLUR_RADIUS + offset]);
            assert!(weights[SSAO_MAX_BLUR_RADIUS + offset] < weights[SSAO_MAX_BLUR_RADIUS + offset - 1]);
        }
    }

    #[test]
    fn narrow_gauss_leaves_outer_taps_empty() {
        let weights = gauss_weights(1.0);
        assert_eq!(weights[0], 0.0);
        assert_eq!(weights[2 * SSAO_MAX_BLUR_RADIUS], 0.0);
        assert!(weights[SSAO_MAX_BLUR_RADIUS + 2] > 0.0);
    }

    #[test]
    fn blur_weights_pack_in_order() {
        let weights = gauss_weights(2.5);
        let packed = pack_blur_weights(&weights);
        assert_eq!(packed[0].x, weights[0]);
        assert_eq!(packed[1].y, weights[5]);
        assert_eq!(packed[2].z, weights[10]);
        assert_eq!(packed[2].w, 0.0);
    }

    #[test]
    fn ssao_offsets_lengths() {
        for offset in ssao_offsets() {
            let length = offset.truncate().length();
            assert!((0.25..=1.0).contains(&length), "{length}");
            assert_eq!(offset.w, 0.0);
        }
    }

    #[test]
    fn material_indices_default_to_invalid() {
        let textures = MaterialTextures {
            albedo: Some(3),
            normal: None,
            metalness: None,
            roughness: Some(7),
        };
        let constants = MaterialConstants::new(&MaterialData::default(), textures, true);
        assert_eq!(constants.albedo_texture, 3);
        assert_eq!(constants.normal_texture, INVALID_INDEX);
        assert_eq!(constants.roughness_texture, 7);
        assert_eq!(constants.transparent, 1);
    }

    #[test]
    fn texture_matrix_maps_ndc_corners() {
        let m = ndc_to_texture();
        let top_left = m * Vec4::new(-1.0, 1.0, 0.5, 1.0);
        let bottom_right = m * Vec4::new(1.0, -1.0, 0.5, 1.0);
        assert_eq!(top_left.truncate().truncate(), Vec2::new(0.0, 0.0));
        assert_eq!(bottom_right.truncate().truncate(), Vec2::new(1.0, 1.0));
    }
}
