//! Fixed capacity, bump allocated descriptor heaps.
//!
//! Each heap hands out stable slot indices. A slot index is both the CPU side
//! handle used to look a view back up and the GPU side index into the bindless
//! arrays of the [`ResourceTable`](crate::ResourceTable). Slots are never freed
//! individually: the only way to reclaim them is to rewind the heap with a
//! [`DescriptorHeapMark`].

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use wgpu::{TextureView, TextureViewDimension};

use crate::{texture::TextureId, DescriptorHeapError};

/// Which kind of views a heap holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    RenderTarget,
    DepthStencil,
    /// Combined sampled and storage views. The only kind visible to shaders.
    ShaderResource,
}

/// Handle to one slot of a [`DescriptorHeap`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    index: u32,
    kind: DescriptorHeapKind,
}

impl Descriptor {
    /// Slot index, usable directly as a bindless index.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }
}

/// How a view is used. Determines which heap it lives in and whether shaders see it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
    /// Filterable float view, bound into the bindless arrays.
    Sampled,
    /// Depth or unfilterable view. Occupies a slot but is only reachable through explicit bind groups.
    SampledRaw,
    Storage,
}

impl ViewKind {
    pub fn heap_kind(self) -> DescriptorHeapKind {
        match self {
            Self::RenderTarget => DescriptorHeapKind::RenderTarget,
            Self::DepthStencil => DescriptorHeapKind::DepthStencil,
            Self::Sampled | Self::SampledRaw | Self::Storage => DescriptorHeapKind::ShaderResource,
        }
    }
}

/// A view written into a heap slot, remembering which allocation it was created from.
#[derive(Debug, Clone)]
pub struct HeapView {
    pub view: Arc<TextureView>,
    pub owner: TextureId,
    /// Generation of the owner's allocation when the view was created.
    pub generation: u32,
    pub dimension: TextureViewDimension,
    pub kind: ViewKind,
}

/// A fixed capacity array of view slots of one kind.
///
/// `size <= capacity` always holds. Allocation past capacity either returns
/// [`DescriptorHeapError::Exhausted`] or panics, depending on the entry point.
pub struct DescriptorHeap<V> {
    kind: DescriptorHeapKind,
    capacity: u32,
    size: u32,
    slots: Vec<Option<V>>,
    dirty: bool,
}

impl<V> DescriptorHeap<V> {
    pub fn new(kind: DescriptorHeapKind, capacity: u32) -> Self {
        log::debug!("Creating {kind:?} descriptor heap with {capacity} slots");
        Self {
            kind,
            capacity,
            size: 0,
            slots: Vec::with_capacity(capacity as usize),
            dirty: true,
        }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots handed out.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn try_alloc(&mut self) -> Result<Descriptor, DescriptorHeapError> {
        if self.size >= self.capacity {
            return Err(DescriptorHeapError::Exhausted {
                kind: self.kind,
                capacity: self.capacity,
            });
        }

        let index = self.size;
        self.size += 1;
        self.slots.push(None);

        Ok(Descriptor { index, kind: self.kind })
    }

    /// Allocates the next slot.
    ///
    /// # Panics
    ///
    /// Panics when the heap is full. Heaps are sized for everything the renderer
    /// will ever create, so running out is a sizing bug.
    pub fn alloc(&mut self) -> Descriptor {
        match self.try_alloc() {
            Ok(descriptor) => descriptor,
            Err(e) => panic!("{e}"),
        }
    }

    /// Stores `value` in the slot of `descriptor`, replacing what was there.
    pub fn write(&mut self, descriptor: Descriptor, value: V) {
        assert_eq!(
            descriptor.kind, self.kind,
            "writing a {:?} descriptor into a {:?} heap",
            descriptor.kind, self.kind
        );
        let slot = self
            .slots
            .get_mut(descriptor.index as usize)
            .unwrap_or_else(|| panic!("descriptor {} was never allocated from this heap", descriptor.index));
        *slot = Some(value);
        self.dirty = true;
    }

    pub fn get(&self, descriptor: Descriptor) -> Option<&V> {
        if descriptor.kind != self.kind {
            return None;
        }
        self.slots.get(descriptor.index as usize)?.as_ref()
    }

    /// Every slot up to `size`, in index order.
    pub fn slots(&self) -> impl ExactSizeIterator<Item = Option<&V>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Opens a scratch region. Everything allocated through the returned guard is
    /// released when it drops.
    pub fn mark(&mut self) -> DescriptorHeapMark<'_, V> {
        let saved_size = self.size;
        DescriptorHeapMark { heap: self, saved_size }
    }

    /// Returns whether any slot changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    fn rewind(&mut self, size: u32) {
        if size < self.size {
            log::trace!("Rewinding {:?} heap from {} to {} slots", self.kind, self.size, size);
            self.slots.truncate(size as usize);
            self.size = size;
            self.dirty = true;
        }
    }
}

/// Scoped allocation guard over a [`DescriptorHeap`].
///
/// Snapshots the heap size on creation and restores it on drop, clearing every
/// slot allocated in between.
pub struct DescriptorHeapMark<'a, V> {
    heap: &'a mut DescriptorHeap<V>,
    saved_size: u32,
}

impl<V> DescriptorHeapMark<'_, V> {
    /// Heap size when the mark was taken.
    pub fn saved_size(&self) -> u32 {
        self.saved_size
    }
}

impl<V> Deref for DescriptorHeapMark<'_, V> {
    type Target = DescriptorHeap<V>;

    fn deref(&self) -> &Self::Target {
        self.heap
    }
}

impl<V> DerefMut for DescriptorHeapMark<'_, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.heap
    }
}

impl<V> Drop for DescriptorHeapMark<'_, V> {
    fn drop(&mut self) {
        self.heap.rewind(self.saved_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_four_heap() {
        let mut heap = DescriptorHeap::<u32>::new(DescriptorHeapKind::ShaderResource, 4);
        let indices: Vec<_> = (0..4).map(|_| heap.alloc().index()).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
        assert_eq!(heap.size(), heap.capacity());

        assert_eq!(
            heap.try_alloc(),
            Err(DescriptorHeapError::Exhausted {
                kind: DescriptorHeapKind::ShaderResource,
                capacity: 4
            })
        );
        assert_eq!(heap.size(), 4);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn alloc_past_capacity_panics() {
        let mut heap = DescriptorHeap::<u32>::new(DescriptorHeapKind::RenderTarget, 1);
        heap.alloc();
        heap.alloc();
    }

    #[test]
    fn write_and_get() {
        let mut heap = DescriptorHeap::new(DescriptorHeapKind::DepthStencil, 2);
        let a = heap.alloc();
        let b = heap.alloc();
        assert_eq!(heap.get(a), None);

        heap.write(b, "depth");
        assert_eq!(heap.get(b), Some(&"depth"));
        assert_eq!(heap.get(a), None);

        let mut other = DescriptorHeap::<&str>::new(DescriptorHeapKind::RenderTarget, 2);
        let foreign = other.alloc();
        assert_eq!(heap.get(foreign), None);
    }

    #[test]
    fn mark_rewinds_scratch_allocations() {
        let mut heap = DescriptorHeap::new(DescriptorHeapKind::ShaderResource, 8);
        let persistent = heap.alloc();
        heap.write(persistent, 10);
        heap.take_dirty();

        {
            let mut mark = heap.mark();
            assert_eq!(mark.saved_size(), 1);
            let scratch: Vec<_> = (0..5).map(|_| mark.alloc()).collect();
            for (value, &d) in scratch.iter().enumerate() {
                mark.write(d, value as i32);
            }
            assert_eq!(mark.size(), 6);
        }

        assert_eq!(heap.size(), 1);
        assert_eq!(heap.get(persistent), Some(&10));
        assert!(heap.take_dirty());

        // Rewound slots are handed out again.
        let reused = heap.alloc();
        assert_eq!(reused.index(), 1);
        assert_eq!(heap.get(reused), None);
    }

    #[test]
    fn nested_marks() {
        let mut heap = DescriptorHeap::<u32>::new(DescriptorHeapKind::ShaderResource, 8);
        heap.alloc();
        {
            let mut outer = heap.mark();
            outer.alloc();
            {
                let mut inner = outer.mark();
                inner.alloc();
                inner.alloc();
                assert_eq!(inner.size(), 4);
            }
            assert_eq!(outer.size(), 2);
        }
        assert_eq!(heap.size(), 1);
    }

    #[test]
    fn empty_mark_leaves_heap_clean() {
        let mut heap = DescriptorHeap::<u32>::new(DescriptorHeapKind::ShaderResource, 2);
        heap.take_dirty();
        drop(heap.mark());
        assert!(!heap.take_dirty());
    }

    #[test]
    fn view_kinds_map_to_heaps() {
        assert_eq!(ViewKind::RenderTarget.heap_kind(), DescriptorHeapKind::RenderTarget);
        assert_eq!(ViewKind::DepthStencil.heap_kind(), DescriptorHeapKind::DepthStencil);
        assert_eq!(ViewKind::Storage.heap_kind(), DescriptorHeapKind::ShaderResource);
        assert_eq!(ViewKind::SampledRaw.heap_kind(), DescriptorHeapKind::ShaderResource);
    }
}
