//! Type declarations for the radiance deferred renderer.
//!
//! This is reexported in the radiance crate proper and includes all the plain
//! data that crosses the boundary between the renderer and the outside world:
//! mesh and material data, lights, decoded images, the loader traits for the
//! asset collaborators, and the per-frame [`RenderSettings`] snapshot.

use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
/// Reexport of the glam version radiance is using.
pub use glam;
use glam::{Vec2, Vec3, Vec4};
use thiserror::Error;

mod settings;
pub use settings::*;

/// A single vertex as consumed by every geometry pass.
///
/// Layout matches the vertex buffer layout declared by the routines, so
/// vertex data can be uploaded with [`bytemuck::cast_slice`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub uv: Vec2,
}

/// Range of a mesh's index buffer drawn with a single material.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SubMesh {
    /// Index into the owning mesh's material list.
    pub material_index: u32,
    pub index_count: u32,
    pub start_index: u32,
    pub base_vertex: i32,
    /// Transparent submeshes are drawn after every opaque one.
    pub transparent: bool,
}

/// Scalar and texture parameters of a material, prior to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub ambient: Vec4,
    pub albedo: Vec4,
    pub metalness: f32,
    pub roughness: f32,
    pub albedo_texture: Option<PathBuf>,
    pub normal_texture: Option<PathBuf>,
    pub metalness_texture: Option<PathBuf>,
    pub roughness_texture: Option<PathBuf>,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            ambient: Vec4::new(0.1, 0.1, 0.1, 1.0),
            albedo: Vec4::new(0.7, 0.7, 0.7, 1.0),
            metalness: 0.0,
            roughness: 0.8,
            albedo_texture: None,
            normal_texture: None,
            metalness_texture: None,
            roughness_texture: None,
        }
    }
}

/// CPU side mesh as produced by a [`MeshLoader`].
#[derive(Debug, Default, Clone)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubMesh>,
    pub materials: Vec<MaterialData>,
}

impl MeshData {
    /// Iterates submeshes with every opaque submesh ahead of every transparent one,
    /// keeping the relative order within each group.
    pub fn submeshes_in_draw_order(&self) -> impl Iterator<Item = &SubMesh> {
        let opaque = self.submeshes.iter().filter(|s| !s.transparent);
        let transparent = self.submeshes.iter().filter(|s| s.transparent);
        opaque.chain(transparent)
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum LightType {
    Point = 0,
    Spot = 1,
    #[default]
    Directional = 2,
}

/// A light in the scene.
///
/// View space values are recomputed by the renderer every frame from the
/// camera's view matrix.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Light {
    pub position_ws: Vec4,
    pub direction_ws: Vec4,
    pub position_vs: Vec4,
    pub direction_vs: Vec4,
    pub color: Vec4,
    pub spotlight_angle: f32,
    pub range: f32,
    pub intensity: f32,
    pub enabled: bool,
    pub selected: bool,
    pub ty: LightType,
}

impl Light {
    /// The sun: a white, enabled directional light.
    pub fn sun(sun: &SunSettings) -> Self {
        Self {
            position_ws: Vec4::ZERO,
            direction_ws: sun.direction().extend(0.0),
            position_vs: Vec4::ZERO,
            direction_vs: Vec4::ZERO,
            color: Vec4::ONE,
            spotlight_angle: 0.0,
            range: 0.0,
            intensity: sun.intensity,
            enabled: true,
            selected: false,
            ty: LightType::Directional,
        }
    }
}

/// Raw pixels as returned by an [`ImageDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// When set, `pixels` holds native endian `f32` texels, otherwise `u8` texels.
    pub hdr: bool,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn bytes_per_pixel(&self) -> u32 {
        self.channels * if self.hdr { 4 } else { 1 }
    }

    pub fn pitch(&self) -> u32 {
        self.width * self.bytes_per_pixel()
    }

    pub fn byte_size(&self) -> usize {
        (self.pitch() * self.height) as usize
    }
}

/// Failure to load an external asset. Always fatal to the caller.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Failed to load mesh {path:?}: {reason}")]
    Mesh { path: PathBuf, reason: String },
    #[error("Failed to decode image {path:?}: {reason}")]
    Image { path: PathBuf, reason: String },
}

/// Scene import collaborator. May serve from an on-disk cache next to `path`.
pub trait MeshLoader {
    fn load_mesh(&self, path: &Path) -> Result<MeshData, AssetError>;
}

/// Image decoding collaborator.
pub trait ImageDecoder {
    fn decode(&self, path: &Path) -> Result<ImageData, AssetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 56);
    }

    #[test]
    fn material_defaults() {
        let mat = MaterialData::default();
        assert_eq!(mat.ambient.x, 0.1);
        assert_eq!(mat.albedo.x, 0.7);
        assert_eq!(mat.metalness, 0.0);
        assert_eq!(mat.roughness, 0.8);
    }

    #[test]
    fn transparent_submeshes_sort_last() {
        let sub = |material_index, transparent| SubMesh {
            material_index,
            transparent,
            ..Default::default()
        };
        let mesh = MeshData {
            submeshes: vec![sub(0, true), sub(1, false), sub(2, true), sub(3, false)],
            ..Default::default()
        };
        let order: Vec<_> = mesh.submeshes_in_draw_order().map(|s| s.material_index).collect();
        assert_eq!(order, [1, 3, 0, 2]);
    }

    #[test]
    fn hdr_image_sizes() {
        let image = ImageData {
            width: 4,
            height: 2,
            channels: 4,
            hdr: true,
            pixels: Vec::new(),
        };
        assert_eq!(image.bytes_per_pixel(), 16);
        assert_eq!(image.pitch(), 64);
        assert_eq!(image.byte_size(), 128);
    }
}
