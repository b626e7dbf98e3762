use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use radiance_types::ImageData;
use wgpu::{
    Device, Extent3d, ImageCopyTexture, ImageDataLayout, Origin3d, Queue, TextureAspect, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor, TextureViewDimension,
};

use crate::{
    format_sso,
    util::{math::num_mip_levels, typedefs::SsoString},
    Descriptor, DescriptorHeap, DescriptorHeapError, Descriptors, HeapView, ViewKind,
};

/// Process unique identity of a [`Texture`], stable across resizes.
pub type TextureId = u64;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub usage: TextureUsages,
}

impl TextureInfo {
    /// Single mip, single layer 2D texture.
    pub fn d2(width: u32, height: u32, format: TextureFormat, usage: TextureUsages) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            format,
            dimension: TextureDimension::D2,
            usage,
        }
    }

    pub fn with_layers(self, layers: u32) -> Self {
        Self {
            depth_or_array_layers: layers,
            ..self
        }
    }

    pub fn with_mips(self, mip_level_count: u32) -> Self {
        Self { mip_level_count, ..self }
    }

    /// Full mip chain down to 1x1.
    pub fn with_full_mips(self) -> Self {
        let levels = match self.dimension {
            TextureDimension::D3 => num_mip_levels(self.width.max(self.depth_or_array_layers), self.height),
            _ => num_mip_levels(self.width, self.height),
        };
        self.with_mips(levels)
    }

    /// Cube of `size`x`size` faces.
    pub fn cube(size: u32, format: TextureFormat, usage: TextureUsages) -> Self {
        Self::d2(size, size, format, usage).with_layers(6)
    }

    /// `size`³ volume.
    pub fn d3(size: u32, format: TextureFormat, usage: TextureUsages) -> Self {
        Self {
            dimension: TextureDimension::D3,
            ..Self::d2(size, size, format, usage).with_layers(size)
        }
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth_or_array_layers,
        }
    }

    /// Extent of `mip` along the x axis.
    pub fn mip_width(&self, mip: u32) -> u32 {
        (self.width >> mip).max(1)
    }
}

/// Which view of a texture to create.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ViewDesc {
    RenderTarget {
        mip: u32,
        layer: u32,
    },
    DepthStencil {
        layer: u32,
    },
    /// Filterable view visible in the bindless arrays.
    Sampled {
        dimension: TextureViewDimension,
        base_mip: u32,
        /// `None` covers every mip from `base_mip` down.
        mip_count: Option<u32>,
    },
    /// Depth or unfilterable view, bound through explicit bind groups.
    SampledRaw {
        dimension: TextureViewDimension,
    },
    Storage {
        mip: u32,
    },
}

impl ViewDesc {
    /// Every mip, filterable.
    pub fn sampled(dimension: TextureViewDimension) -> Self {
        Self::Sampled {
            dimension,
            base_mip: 0,
            mip_count: None,
        }
    }

    pub fn kind(&self) -> ViewKind {
        match self {
            Self::RenderTarget { .. } => ViewKind::RenderTarget,
            Self::DepthStencil { .. } => ViewKind::DepthStencil,
            Self::Sampled { .. } => ViewKind::Sampled,
            Self::SampledRaw { .. } => ViewKind::SampledRaw,
            Self::Storage { .. } => ViewKind::Storage,
        }
    }
}

struct ViewRecord {
    descriptor: Descriptor,
    desc: ViewDesc,
}

/// A GPU image plus the heap slots of the views created from it.
///
/// [`Texture::resize`] replaces the allocation and bumps its generation. Every
/// recorded view still points at the old allocation until
/// [`Texture::rebuild_views`] rewrites the same heap slots, which keeps every
/// bindless index handed out stable across resizes.
pub struct Texture {
    label: SsoString,
    id: TextureId,
    generation: u32,
    info: TextureInfo,
    texture: wgpu::Texture,
    views: Vec<ViewRecord>,
}

impl Texture {
    pub fn create(device: &Device, label: &str, info: TextureInfo) -> Self {
        let id = NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Creating texture {label} ({}x{}x{}, {} mips, {:?})",
            info.width,
            info.height,
            info.depth_or_array_layers,
            info.mip_level_count,
            info.format
        );

        Self {
            label: label.into(),
            id,
            generation: 0,
            info,
            texture: create_raw(device, label, &info),
            views: Vec::new(),
        }
    }

    /// Uploads decoded pixels into mip 0 of a new 2D texture.
    ///
    /// Three channel images are widened to four channels. HDR images become
    /// `Rgba32Float`, everything else `Rgba8Unorm`.
    pub fn from_image(
        device: &Device,
        queue: &Queue,
        label: &str,
        image: &ImageData,
        usage: TextureUsages,
        mips: bool,
    ) -> Self {
        profiling::scope!("Texture::from_image");

        let format = if image.hdr {
            TextureFormat::Rgba32Float
        } else {
            TextureFormat::Rgba8Unorm
        };
        let mut info = TextureInfo::d2(image.width, image.height, format, usage | TextureUsages::COPY_DST);
        if mips {
            info = info.with_full_mips();
        }

        let pixels = expand_to_rgba(image);
        let texture = Self::create(device, label, info);
        let bytes_per_texel = if image.hdr { 16 } else { 4 };
        queue.write_texture(
            ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &pixels,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.width * bytes_per_texel),
                rows_per_image: None,
            },
            Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );

        texture
    }

    /// Replaces the allocation with one of the new size. Views are stale until [`Self::rebuild_views`].
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        profiling::scope!("Texture::resize");

        let info = TextureInfo {
            width,
            height,
            ..self.info
        };
        self.texture = create_raw(device, &self.label, &info);
        self.info = info;
        self.generation += 1;
        log::debug!(
            "Resized texture {} to {width}x{height} (generation {})",
            self.label,
            self.generation
        );
    }

    /// Creates a view and records it so it follows the texture through resizes.
    pub fn create_view(
        &mut self,
        descriptors: &mut Descriptors,
        desc: ViewDesc,
    ) -> Result<Descriptor, DescriptorHeapError> {
        let heap = descriptors.heap_mut(desc.kind().heap_kind());
        let descriptor = heap.try_alloc()?;
        heap.write(descriptor, self.heap_view(desc));
        self.views.push(ViewRecord { descriptor, desc });
        Ok(descriptor)
    }

    /// Creates a view that is not recorded on the texture, usually inside a [`DescriptorHeapMark`](crate::DescriptorHeapMark).
    /// Returns the slot along with the view written into it.
    pub fn scratch_view(
        &self,
        heap: &mut DescriptorHeap<HeapView>,
        desc: ViewDesc,
    ) -> Result<(Descriptor, Arc<TextureView>), DescriptorHeapError> {
        assert_eq!(heap.kind(), desc.kind().heap_kind(), "{desc:?} placed in the wrong heap");
        let descriptor = heap.try_alloc()?;
        let view = self.heap_view(desc);
        let raw = Arc::clone(&view.view);
        heap.write(descriptor, view);
        Ok((descriptor, raw))
    }

    /// Rewrites every recorded view against the current allocation.
    pub fn rebuild_views(&self, descriptors: &mut Descriptors) {
        profiling::scope!("Texture::rebuild_views");
        for record in &self.views {
            descriptors
                .heap_mut(record.descriptor.kind())
                .write(record.descriptor, self.heap_view(record.desc));
        }
    }

    /// Whether every recorded view points at the current allocation.
    pub fn views_current(&self, descriptors: &Descriptors) -> bool {
        self.views.iter().all(|record| {
            descriptors
                .heap_view(record.descriptor)
                .map_or(false, |view| view.owner == self.id && view.generation == self.generation)
        })
    }

    fn heap_view(&self, desc: ViewDesc) -> HeapView {
        let (view, dimension) = self.raw_view(desc);
        HeapView {
            view: Arc::new(view),
            owner: self.id,
            generation: self.generation,
            dimension,
            kind: desc.kind(),
        }
    }

    /// Creates an unrecorded wgpu view matching `desc`.
    pub fn raw_view(&self, desc: ViewDesc) -> (TextureView, TextureViewDimension) {
        let (dimension, base_mip_level, mip_level_count, base_array_layer, array_layer_count) = match desc {
            ViewDesc::RenderTarget { mip, layer } => (TextureViewDimension::D2, mip, Some(1), layer, Some(1)),
            ViewDesc::DepthStencil { layer } => (TextureViewDimension::D2, 0, Some(1), layer, Some(1)),
            ViewDesc::Sampled {
                dimension,
                base_mip,
                mip_count,
            } => (dimension, base_mip, mip_count, 0, None),
            ViewDesc::SampledRaw { dimension } => (dimension, 0, None, 0, None),
            ViewDesc::Storage { mip } => (self.storage_dimension(), mip, Some(1), 0, None),
        };

        let label = format_sso!("{} {:?}", self.label, desc);
        let view = self.texture.create_view(&TextureViewDescriptor {
            label: Some(&label),
            format: None,
            dimension: Some(dimension),
            aspect: TextureAspect::All,
            base_mip_level,
            mip_level_count,
            base_array_layer,
            array_layer_count,
        });
        (view, dimension)
    }

    fn storage_dimension(&self) -> TextureViewDimension {
        match (self.info.dimension, self.info.depth_or_array_layers) {
            (TextureDimension::D3, _) => TextureViewDimension::D3,
            (_, 1) => TextureViewDimension::D2,
            _ => TextureViewDimension::D2Array,
        }
    }

    fn first_view(&self, matches: impl Fn(&ViewDesc) -> bool) -> Option<Descriptor> {
        self.views
            .iter()
            .find(|record| matches(&record.desc))
            .map(|record| record.descriptor)
    }

    pub fn rtv(&self) -> Option<Descriptor> {
        self.first_view(|d| matches!(d, ViewDesc::RenderTarget { .. }))
    }

    /// First shader resource view, filterable or raw.
    pub fn srv(&self) -> Option<Descriptor> {
        self.first_view(|d| matches!(d, ViewDesc::Sampled { .. } | ViewDesc::SampledRaw { .. }))
    }

    pub fn raw(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Gives up the views and hands back the wgpu texture, e.g. to keep it alive in a command list.
    pub fn into_raw(self) -> wgpu::Texture {
        self.texture
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn create_raw(device: &Device, label: &str, info: &TextureInfo) -> wgpu::Texture {
    device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: info.extent(),
        mip_level_count: info.mip_level_count,
        sample_count: 1,
        dimension: info.dimension,
        format: info.format,
        usage: info.usage,
        view_formats: &[],
    })
}

fn expand_to_rgba(image: &ImageData) -> Cow<'_, [u8]> {
    let texel_bytes = if image.hdr { 4 } else { 1 };
    if image.channels == 4 {
        return Cow::Borrowed(&image.pixels);
    }

    let float_one = 1.0f32.to_ne_bytes();
    let one: &[u8] = if image.hdr { &float_one } else { &[255] };
    let mut out = Vec::with_capacity((image.width * image.height * 4 * texel_bytes) as usize);
    for texel in image.pixels.chunks_exact((image.channels * texel_bytes) as usize) {
        out.extend_from_slice(texel);
        for _ in image.channels..3 {
            // Gray images replicate their single channel.
            out.extend_from_slice(&texel[..texel_bytes as usize]);
        }
        out.extend_from_slice(one);
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(channels: u32, hdr: bool, pixels: Vec<u8>) -> ImageData {
        ImageData {
            width: 1,
            height: 1,
            channels,
            hdr,
            pixels,
        }
    }

    #[test]
    fn rgba_passes_through() {
        let img = image(4, false, vec![1, 2, 3, 4]);
        assert!(matches!(expand_to_rgba(&img), Cow::Borrowed(_)));
    }

    #[test]
    fn rgb_gains_opaque_alpha() {
        let img = image(3, false, vec![1, 2, 3]);
        assert_eq!(&*expand_to_rgba(&img), &[1, 2, 3, 255]);
    }

    #[test]
    fn gray_is_replicated() {
        let img = image(1, false, vec![7]);
        assert_eq!(&*expand_to_rgba(&img), &[7, 7, 7, 255]);
    }

    #[test]
    fn hdr_rgb_gains_float_one() {
        let mut pixels = Vec::new();
        for v in [0.5f32, 1.5, 2.5] {
            pixels.extend_from_slice(&v.to_ne_bytes());
        }
        let img = image(3, true, pixels);
        let out = expand_to_rgba(&img);
        let floats: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, [0.5, 1.5, 2.5, 1.0]);
    }

    #[test]
    fn full_mips() {
        let usage = TextureUsages::TEXTURE_BINDING;
        let info = TextureInfo::d2(256, 256, TextureFormat::Rgba8Unorm, usage).with_full_mips();
        assert_eq!(info.mip_level_count, 9);
        let volume = TextureInfo::d3(128, TextureFormat::Rgba8Unorm, usage).with_full_mips();
        assert_eq!(volume.mip_level_count, 8);
        assert_eq!(volume.depth_or_array_layers, 128);
        assert_eq!(volume.mip_width(7), 1);
        assert_eq!(volume.mip_width(9), 1);
    }
}
