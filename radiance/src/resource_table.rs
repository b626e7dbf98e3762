//! The bindless resource table: every filterable view in the shader resource
//! heap, exposed to shaders as one binding array per view dimension.

use std::{num::NonZeroU32, sync::Arc};

use wgpu::{
    BindGroup, BindGroupLayout, BindingType, Device, Extent3d, ShaderStages, TextureDescriptor, TextureDimension,
    TextureFormat, TextureSampleType, TextureUsages, TextureView, TextureViewDescriptor, TextureViewDimension,
};

use crate::{
    format_sso,
    util::{
        bind_merge::{BindGroupBuilder, BindGroupLayoutBuilder},
        typedefs::FastHashMap,
    },
    Descriptor, DescriptorHeap, DescriptorHeapKind, HeapView, TextureId, ViewKind,
};

/// View dimensions with a binding array in the table, in binding order.
pub const TABLE_DIMENSIONS: [TextureViewDimension; 4] = [
    TextureViewDimension::D2,
    TextureViewDimension::D2Array,
    TextureViewDimension::Cube,
    TextureViewDimension::D3,
];

/// Shader visible heap plus the bind groups mirroring it.
///
/// Shaders index the array matching a view's dimension with the view's slot
/// index. Slots holding something else in that array read a 1x1 null texture.
///
/// wgpu rejects a pass that samples a texture it also writes, so a pass asks
/// for the table with the textures it writes excluded. Excluded slots read
/// the null texture for that pass only. One bind group is cached per
/// exclusion set until the heap changes.
pub struct ResourceTable {
    heap: DescriptorHeap<HeapView>,
    layout: Arc<BindGroupLayout>,
    bind_groups: FastHashMap<Vec<TextureId>, Arc<BindGroup>>,
    null_views: [TextureView; 4],
}

impl ResourceTable {
    pub fn new(device: &Device, capacity: u32) -> Self {
        profiling::scope!("ResourceTable::new");

        let count = NonZeroU32::new(capacity.max(1));
        let mut builder = BindGroupLayoutBuilder::new();
        for dimension in TABLE_DIMENSIONS {
            builder.append(
                ShaderStages::VERTEX_FRAGMENT | ShaderStages::COMPUTE,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: dimension,
                    multisampled: false,
                },
                count,
            );
        }
        let layout = Arc::new(builder.build(device, Some("resource table bgl")));

        Self {
            heap: DescriptorHeap::new(DescriptorHeapKind::ShaderResource, capacity.max(1)),
            layout,
            bind_groups: FastHashMap::default(),
            null_views: TABLE_DIMENSIONS.map(|dimension| create_null_tex_view(device, dimension)),
        }
    }

    pub fn heap(&self) -> &DescriptorHeap<HeapView> {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut DescriptorHeap<HeapView> {
        &mut self.heap
    }

    pub fn layout(&self) -> &Arc<BindGroupLayout> {
        &self.layout
    }

    /// The table with every live view visible.
    pub fn ready(&mut self, device: &Device) -> Arc<BindGroup> {
        self.ready_excluding(device, &[])
    }

    /// The table with the views of `written` replaced by the null texture.
    pub fn ready_excluding(&mut self, device: &Device, written: &[TextureId]) -> Arc<BindGroup> {
        if self.heap.take_dirty() {
            self.bind_groups.clear();
        }

        let mut key = written.to_vec();
        key.sort_unstable();
        key.dedup();

        if let Some(bind_group) = self.bind_groups.get(&key) {
            return Arc::clone(bind_group);
        }

        let bind_group = Arc::new(self.build_bind_group(device, &key));
        self.bind_groups.insert(key, Arc::clone(&bind_group));
        bind_group
    }

    fn build_bind_group(&self, device: &Device, excluded: &[TextureId]) -> BindGroup {
        profiling::scope!("ResourceTable::build_bind_group");

        let capacity = self.heap.capacity() as usize;
        let arrays: Vec<Vec<&TextureView>> = TABLE_DIMENSIONS
            .iter()
            .zip(&self.null_views)
            .map(|(&dimension, null_view)| {
                let mut views = Vec::with_capacity(capacity);
                views.extend(self.heap.slots().map(|slot| match slot {
                    Some(view) if is_visible(view, dimension, excluded) => &*view.view,
                    _ => null_view,
                }));
                views.resize(capacity, null_view);
                views
            })
            .collect();

        log::trace!(
            "Rebuilding resource table with {} live slots, {} textures excluded",
            self.heap.size(),
            excluded.len()
        );

        let mut builder = BindGroupBuilder::new();
        for views in &arrays {
            builder.append_texture_view_array(views);
        }
        builder.build(device, Some("resource table"), &self.layout)
    }
}

fn is_visible(view: &HeapView, dimension: TextureViewDimension, excluded: &[TextureId]) -> bool {
    view.kind == ViewKind::Sampled && view.dimension == dimension && excluded.binary_search(&view.owner).is_err()
}

/// Every descriptor heap the renderer allocates from.
pub struct Descriptors {
    pub rtv: DescriptorHeap<HeapView>,
    pub dsv: DescriptorHeap<HeapView>,
    pub table: ResourceTable,
}

impl Descriptors {
    pub fn new(device: &Device, rtv_capacity: u32, dsv_capacity: u32, srv_capacity: u32) -> Self {
        Self {
            rtv: DescriptorHeap::new(DescriptorHeapKind::RenderTarget, rtv_capacity),
            dsv: DescriptorHeap::new(DescriptorHeapKind::DepthStencil, dsv_capacity),
            table: ResourceTable::new(device, srv_capacity),
        }
    }

    pub fn heap(&self, kind: DescriptorHeapKind) -> &DescriptorHeap<HeapView> {
        match kind {
            DescriptorHeapKind::RenderTarget => &self.rtv,
            DescriptorHeapKind::DepthStencil => &self.dsv,
            DescriptorHeapKind::ShaderResource => self.table.heap(),
        }
    }

    pub fn heap_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorHeap<HeapView> {
        match kind {
            DescriptorHeapKind::RenderTarget => &mut self.rtv,
            DescriptorHeapKind::DepthStencil => &mut self.dsv,
            DescriptorHeapKind::ShaderResource => self.table.heap_mut(),
        }
    }

    pub fn heap_view(&self, descriptor: Descriptor) -> Option<&HeapView> {
        self.heap(descriptor.kind()).get(descriptor)
    }

    /// The wgpu view behind `descriptor`.
    ///
    /// # Panics
    ///
    /// Panics if the slot was never written, which means a pass uses a view it never created.
    pub fn view(&self, descriptor: Descriptor) -> &TextureView {
        match self.heap_view(descriptor) {
            Some(view) => &view.view,
            None => panic!(
                "{:?} descriptor {} has no view written",
                descriptor.kind(),
                descriptor.index()
            ),
        }
    }
}

fn create_null_tex_view(device: &Device, dimension: TextureViewDimension) -> TextureView {
    let label = format_sso!("null {:?} texture", dimension);
    device
        .create_texture(&TextureDescriptor {
            label: Some(&label),
            size: Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: match dimension {
                    TextureViewDimension::Cube | TextureViewDimension::CubeArray => 6,
                    _ => 1,
                },
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: match dimension {
                TextureViewDimension::D1 => TextureDimension::D1,
                TextureViewDimension::D3 => TextureDimension::D3,
                _ => TextureDimension::D2,
            },
            format: TextureFormat::R8Unorm,
            usage: TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
        .create_view(&TextureViewDescriptor {
            dimension: Some(dimension),
            ..TextureViewDescriptor::default()
        })
}
