use std::path::Path;

use glam::{Vec2, Vec3, Vec4};
use radiance::types::{AssetError, ImageData, ImageDecoder, MaterialData, MeshData, SubMesh, Vertex};

/// Decoder for meshes without texture paths. Any decode request is an error.
pub struct NoImages;

impl ImageDecoder for NoImages {
    fn decode(&self, path: &Path) -> Result<ImageData, AssetError> {
        Err(AssetError::Image {
            path: path.to_path_buf(),
            reason: String::from("test meshes carry no textures"),
        })
    }
}

/// A single material cube spanning [-1, 1] on every axis.
pub fn cube(albedo: Vec4) -> MeshData {
    // (normal, tangent) per face
    let faces = [
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let offset = tangent * (u * 2.0 - 1.0) + bitangent * (v * 2.0 - 1.0);
            vertices.push(Vertex {
                position: normal + offset,
                normal,
                tangent,
                bitangent,
                uv: Vec2::new(u, v),
            });
        }
        indices.extend([base, base + 2, base + 1, base, base + 3, base + 2]);
    }

    MeshData {
        submeshes: vec![SubMesh {
            material_index: 0,
            index_count: indices.len() as u32,
            start_index: 0,
            base_vertex: 0,
            transparent: false,
        }],
        materials: vec![MaterialData {
            albedo,
            ..MaterialData::default()
        }],
        vertices,
        indices,
    }
}
