//! Constant buffers owned by one slot of the frame ring.

use radiance::{util::bind_merge::BindGroupBuilder, FrameResourceError, RendererConfig, UploadBuffer, UploadKind};
use wgpu::{BindGroup, BindingResource, Device};

use crate::common::{
    FrameInterface, LightConstants, MaterialConstants, ObjectConstants, PassConstants, ShadowConstants,
    SsaoConstants, VoxelConstants,
};

/// One ring slot's copy of every buffer in group 0.
///
/// The CPU only writes a slot after the ring waited for the GPU to finish the
/// frame that last read it.
pub struct FrameResources {
    pub pass: UploadBuffer<PassConstants>,
    pub objects: UploadBuffer<ObjectConstants>,
    pub materials: UploadBuffer<MaterialConstants>,
    pub lights: UploadBuffer<LightConstants>,
    pub shadow: UploadBuffer<ShadowConstants>,
    pub ssao: UploadBuffer<SsaoConstants>,
    pub voxel: UploadBuffer<VoxelConstants>,
    bind_group: BindGroup,
}

impl FrameResources {
    pub fn new(device: &Device, interface: &FrameInterface, config: &RendererConfig, slot: usize) -> Self {
        profiling::scope!("FrameResources::new");

        let label = |what: &str| format!("frame {slot} {what}");
        let pass = UploadBuffer::new(device, &label("pass constants"), UploadKind::Uniform, 1);
        let objects = UploadBuffer::new(
            device,
            &label("objects"),
            UploadKind::Storage,
            config.object_capacity,
        );
        let materials = UploadBuffer::new(
            device,
            &label("materials"),
            UploadKind::Storage,
            config.material_capacity,
        );
        let lights = UploadBuffer::new(device, &label("lights"), UploadKind::Storage, config.light_capacity);
        let shadow = UploadBuffer::new(device, &label("shadow constants"), UploadKind::Uniform, 1);
        let ssao = UploadBuffer::new(device, &label("ssao constants"), UploadKind::Uniform, 1);
        let voxel = UploadBuffer::new(device, &label("voxel constants"), UploadKind::Uniform, 1);

        let bind_group = BindGroupBuilder::new()
            .append(BindingResource::Buffer(pass.element_binding(0)))
            .append_buffer(objects.buffer())
            .append_buffer(materials.buffer())
            .append_buffer(lights.buffer())
            .append(BindingResource::Buffer(shadow.element_binding(0)))
            .append(BindingResource::Buffer(ssao.element_binding(0)))
            .append(BindingResource::Buffer(voxel.element_binding(0)))
            .build(device, Some(&label("bg")), &interface.bgl);

        Self {
            pass,
            objects,
            materials,
            lights,
            shadow,
            ssao,
            voxel,
            bind_group,
        }
    }

    pub fn bind_group(&self) -> &BindGroup {
        &self.bind_group
    }
}

/// Host side copy of the objects and materials, uploaded into each slot only while it is stale.
///
/// A change marks the data dirty for `frames_in_flight` frames so every ring
/// slot receives it exactly once.
pub struct DirtyUploads<T> {
    data: Vec<T>,
    frames_dirty: u32,
    frames_in_flight: u32,
}

impl<T> DirtyUploads<T> {
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            data: Vec::new(),
            frames_dirty: 0,
            frames_in_flight,
        }
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends an element, returning its index.
    pub fn push(&mut self, value: T) -> u32 {
        self.data.push(value);
        self.frames_dirty = self.frames_in_flight;
        self.data.len() as u32 - 1
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        let value = self.data.get_mut(index as usize)?;
        self.frames_dirty = self.frames_in_flight;
        Some(value)
    }

    pub fn frames_dirty(&self) -> u32 {
        self.frames_dirty
    }

    /// Calls `upload` with every element if the current slot is stale.
    pub fn upload_if_dirty(
        &mut self,
        upload: impl FnOnce(&[T]) -> Result<(), FrameResourceError>,
    ) -> Result<bool, FrameResourceError> {
        if self.frames_dirty == 0 {
            return Ok(false);
        }
        upload(&self.data)?;
        self.frames_dirty -= 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_receives_a_change_once() {
        let mut uploads = DirtyUploads::new(3);
        assert_eq!(uploads.push(7u32), 0);
        assert_eq!(uploads.push(9u32), 1);

        let mut seen = 0;
        for _ in 0..5 {
            let uploaded = uploads
                .upload_if_dirty(|data| {
                    assert_eq!(data, [7, 9]);
                    Ok(())
                })
                .unwrap();
            seen += uploaded as u32;
        }
        assert_eq!(seen, 3);
        assert_eq!(uploads.frames_dirty(), 0);

        *uploads.get_mut(1).unwrap() = 11;
        assert_eq!(uploads.frames_dirty(), 3);
        assert!(uploads.get_mut(5).is_none());
    }

    #[test]
    fn failed_uploads_stay_dirty() {
        let mut uploads = DirtyUploads::new(2);
        uploads.push(1u32);
        let result = uploads.upload_if_dirty(|_| Err(FrameResourceError::OutOfRange { index: 1, count: 0 }));
        assert!(result.is_err());
        assert_eq!(uploads.frames_dirty(), 2);
    }
}
