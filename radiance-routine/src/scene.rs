//! Meshes, render items and the materials they draw with.

use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use glam::{Mat4, Vec3};
use radiance::{
    types::{ImageDecoder, MeshData, SubMesh},
    util::{mipmap::MipmapGenerator, typedefs::FastHashMap},
    Descriptors, Texture, ViewDesc,
};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    Buffer, BufferUsages, CommandEncoder, Device, IndexFormat, Queue, RenderPass, TextureUsages,
    TextureViewDimension,
};

use crate::{
    common::{MaterialConstants, MaterialTextures, ObjectConstants},
    uniforms::DirtyUploads,
    RenderError, SetupError,
};

/// Axis aligned bounds in world space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// A mesh's buffers on the GPU.
pub struct Mesh {
    pub label: String,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    submeshes: Vec<SubMesh>,
    /// Index of the mesh's first material in the material buffer.
    material_base: u32,
    local_bounds: Aabb,
}

impl Mesh {
    pub fn submeshes(&self) -> &[SubMesh] {
        &self.submeshes
    }
}

/// An instance of a mesh placed in the world.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderItem {
    pub mesh: usize,
    pub object_index: u32,
    pub world: Mat4,
}

/// One indexed draw with the indices the shaders need to find its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCall {
    pub object_index: u32,
    pub material_index: u32,
    pub indices: Range<u32>,
    pub base_vertex: i32,
    pub transparent: bool,
}

/// Where uploads during scene loading go.
pub struct SceneUploadContext<'a> {
    pub device: &'a Device,
    pub queue: &'a Queue,
    pub encoder: &'a mut CommandEncoder,
    pub descriptors: &'a mut Descriptors,
    pub mipmaps: &'a MipmapGenerator,
}

pub struct Scene {
    meshes: Vec<Mesh>,
    items: Vec<RenderItem>,
    objects: DirtyUploads<ObjectConstants>,
    materials: DirtyUploads<MaterialConstants>,
    textures: Vec<Texture>,
    /// Bindless index of every texture loaded so far, by path.
    texture_indices: FastHashMap<PathBuf, u32>,
    object_capacity: u32,
    material_capacity: u32,
}

impl Scene {
    pub fn new(frames_in_flight: u32, object_capacity: u32, material_capacity: u32) -> Self {
        Self {
            meshes: Vec::new(),
            items: Vec::new(),
            objects: DirtyUploads::new(frames_in_flight),
            materials: DirtyUploads::new(frames_in_flight),
            textures: Vec::new(),
            texture_indices: FastHashMap::default(),
            object_capacity,
            material_capacity,
        }
    }

    /// Uploads `data` and places one instance of it at `world`. Returns the new render item's index.
    pub fn add_mesh(
        &mut self,
        mut ctx: SceneUploadContext<'_>,
        label: &str,
        data: &MeshData,
        world: Mat4,
        decoder: &dyn ImageDecoder,
    ) -> Result<usize, SetupError> {
        profiling::scope!("Scene::add_mesh");

        if self.objects.len() as u32 + 1 > self.object_capacity {
            return Err(SetupError::CapacityExceeded {
                what: "objects",
                capacity: self.object_capacity,
            });
        }
        if (self.materials.len() + data.materials.len()) as u32 > self.material_capacity {
            return Err(SetupError::CapacityExceeded {
                what: "materials",
                capacity: self.material_capacity,
            });
        }

        let material_base = self.materials.len() as u32;
        for (index, material) in data.materials.iter().enumerate() {
            let textures = MaterialTextures {
                albedo: self.load_texture(&mut ctx, material.albedo_texture.as_deref(), decoder)?,
                normal: self.load_texture(&mut ctx, material.normal_texture.as_deref(), decoder)?,
                metalness: self.load_texture(&mut ctx, material.metalness_texture.as_deref(), decoder)?,
                roughness: self.load_texture(&mut ctx, material.roughness_texture.as_deref(), decoder)?,
            };
            let transparent = data
                .submeshes
                .iter()
                .any(|submesh| submesh.material_index as usize == index && submesh.transparent);
            self.materials
                .push(MaterialConstants::new(material, textures, transparent));
        }

        let vertex_buffer = ctx.device.create_buffer_init(&BufferInitDescriptor {
            label: Some(&format!("{label} vertices")),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: BufferUsages::VERTEX,
        });
        let index_buffer = ctx.device.create_buffer_init(&BufferInitDescriptor {
            label: Some(&format!("{label} indices")),
            contents: bytemuck::cast_slice(&data.indices),
            usage: BufferUsages::INDEX,
        });

        let mut local_bounds = Aabb::EMPTY;
        for vertex in &data.vertices {
            local_bounds.extend(vertex.position);
        }

        let mut submeshes: Vec<SubMesh> = data.submeshes_in_draw_order().copied().collect();
        submeshes.retain(|submesh| submesh.index_count > 0);

        self.meshes.push(Mesh {
            label: label.to_owned(),
            vertex_buffer,
            index_buffer,
            submeshes,
            material_base,
            local_bounds,
        });

        let object_index = self.objects.push(ObjectConstants {
            world,
            prev_world: world,
        });
        self.items.push(RenderItem {
            mesh: self.meshes.len() - 1,
            object_index,
            world,
        });

        log::info!(
            "Added mesh {label}: {} vertices, {} submeshes, {} materials",
            data.vertices.len(),
            data.submeshes.len(),
            data.materials.len()
        );
        Ok(self.items.len() - 1)
    }

    fn load_texture(
        &mut self,
        ctx: &mut SceneUploadContext<'_>,
        path: Option<&Path>,
        decoder: &dyn ImageDecoder,
    ) -> Result<Option<u32>, SetupError> {
        let Some(path) = path else {
            return Ok(None);
        };
        if let Some(&index) = self.texture_indices.get(path) {
            return Ok(Some(index));
        }

        let image = decoder.decode(path)?;
        let mips = image.width == image.height && image.width.is_power_of_two() && !image.hdr;
        let usage = TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT;
        let label = path.to_string_lossy();
        let mut texture = Texture::from_image(ctx.device, ctx.queue, &label, &image, usage, mips);
        if mips {
            ctx.mipmaps
                .generate_mipmaps(ctx.device, ctx.encoder, &texture)
                .map_err(RenderError::from)?;
        }

        let srv = texture.create_view(ctx.descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
        self.textures.push(texture);
        self.texture_indices.insert(path.to_owned(), srv.index());
        Ok(Some(srv.index()))
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn objects_mut(&mut self) -> &mut DirtyUploads<ObjectConstants> {
        &mut self.objects
    }

    pub fn materials_mut(&mut self) -> &mut DirtyUploads<MaterialConstants> {
        &mut self.materials
    }

    /// World space bounds of every render item.
    pub fn bounds(&self) -> Aabb {
        self.items.iter().fold(Aabb::EMPTY, |bounds, item| {
            let local = self.meshes[item.mesh].local_bounds;
            if local.is_empty() {
                return bounds;
            }
            bounds.union(&transform_bounds(&local, item.world))
        })
    }

    /// Every draw of every render item. All opaque draws come before any transparent one.
    pub fn draw_calls(&self) -> impl Iterator<Item = (usize, DrawCall)> + '_ {
        let pass = move |transparent: bool| {
            self.items.iter().flat_map(move |item| {
                let mesh = &self.meshes[item.mesh];
                mesh.submeshes
                    .iter()
                    .filter(move |submesh| submesh.transparent == transparent)
                    .map(move |submesh| {
                        (
                            item.mesh,
                            DrawCall {
                                object_index: item.object_index,
                                material_index: mesh.material_base + submesh.material_index,
                                indices: submesh.start_index..submesh.start_index + submesh.index_count,
                                base_vertex: submesh.base_vertex,
                                transparent,
                            },
                        )
                    })
            })
        };
        pass(false).chain(pass(true))
    }

    /// Records every draw call, letting `push` set push constants before each one.
    pub fn record_draws<'p>(
        &'p self,
        rpass: &mut RenderPass<'p>,
        instances: Range<u32>,
        mut push: impl FnMut(&mut RenderPass<'p>, &DrawCall),
    ) {
        let mut bound = None;
        for (mesh_index, call) in self.draw_calls() {
            if bound != Some(mesh_index) {
                let mesh = &self.meshes[mesh_index];
                rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                rpass.set_index_buffer(mesh.index_buffer.slice(..), IndexFormat::Uint32);
                bound = Some(mesh_index);
            }
            push(rpass, &call);
            rpass.draw_indexed(call.indices.clone(), call.base_vertex, instances.clone());
        }
    }
}

fn transform_bounds(local: &Aabb, world: Mat4) -> Aabb {
    let mut bounds = Aabb::EMPTY;
    for corner in 0..8 {
        let point = Vec3::new(
            if corner & 1 == 0 { local.min.x } else { local.max.x },
            if corner & 2 == 0 { local.min.y } else { local.max.y },
            if corner & 4 == 0 { local.min.z } else { local.max.z },
        );
        bounds.extend(world.transform_point3(point));
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bounds_absorb_points() {
        let mut bounds = Aabb::EMPTY;
        assert!(bounds.is_empty());
        bounds.extend(Vec3::new(1.0, -2.0, 3.0));
        bounds.extend(Vec3::new(-1.0, 2.0, 0.0));
        assert!(!bounds.is_empty());
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(bounds.center(), Vec3::new(0.0, 0.0, 1.5));
        assert_eq!(Aabb::EMPTY.union(&bounds), bounds);
    }

    #[test]
    fn transformed_bounds_cover_rotated_box() {
        let local = Aabb {
            min: Vec3::new(-1.0, 0.0, -2.0),
            max: Vec3::new(1.0, 1.0, 2.0),
        };
        let world = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)) * Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let bounds = transform_bounds(&local, world);
        assert!((bounds.min - Vec3::new(8.0, 0.0, -1.0)).length() < 1e-5);
        assert!((bounds.max - Vec3::new(12.0, 1.0, 1.0)).length() < 1e-5);
    }
}
