//! Ring of per-frame resources and the constant buffers living in them.

use std::{marker::PhantomData, num::NonZeroU64};

use encase::{internal::WriteInto, ShaderSize, ShaderType, StorageBuffer, UniformBuffer};
use wgpu::{Buffer, BufferBinding, BufferDescriptor, BufferUsages, Device, Queue};

use crate::{util::math::round_up_pot, FenceValue, FenceWaiter, FrameResourceError};

/// Lifecycle of one ring slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameSlotState {
    /// Nothing in flight, free to record.
    Idle,
    /// The CPU is writing this slot's constants.
    Recording,
    /// Work reading the slot has been submitted under its fence value.
    Submitted,
    /// The CPU is blocked until the GPU drains the slot.
    Retiring,
}

struct FrameSlot<T> {
    resources: T,
    fence: FenceValue,
    state: FrameSlotState,
}

/// `N` copies of the per-frame resources.
///
/// [`FrameRing::begin_frame`] advances to the next slot and waits for that
/// slot's previous fence before handing out its resources, so the CPU runs at
/// most `N - 1` frames ahead of the GPU.
pub struct FrameRing<T> {
    slots: Vec<FrameSlot<T>>,
    current: usize,
}

impl<T> FrameRing<T> {
    /// # Panics
    ///
    /// Panics if `resources` is empty.
    pub fn new(resources: Vec<T>) -> Self {
        assert!(!resources.is_empty(), "a frame ring needs at least one slot");
        let current = resources.len() - 1;
        Self {
            slots: resources
                .into_iter()
                .map(|resources| FrameSlot {
                    resources,
                    fence: 0,
                    state: FrameSlotState::Idle,
                })
                .collect(),
            current,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn state(&self, index: usize) -> FrameSlotState {
        self.slots[index].state
    }

    pub fn fence(&self, index: usize) -> FenceValue {
        self.slots[index].fence
    }

    /// Advances to the next slot and blocks until the GPU is done with it.
    pub fn begin_frame(&mut self, waiter: &impl FenceWaiter) -> usize {
        profiling::scope!("FrameRing::begin_frame");

        for slot in &mut self.slots {
            if slot.state == FrameSlotState::Submitted && waiter.is_fence_complete(slot.fence) {
                slot.state = FrameSlotState::Idle;
            }
        }

        self.current = (self.current + 1) % self.slots.len();
        let index = self.current;
        let slot = &mut self.slots[index];
        assert_ne!(
            slot.state,
            FrameSlotState::Recording,
            "frame slot {index} began twice without end_frame"
        );

        if slot.state == FrameSlotState::Submitted {
            slot.state = FrameSlotState::Retiring;
            log::trace!("Frame slot {index} waiting on fence value {}", slot.fence);
            waiter.wait_for_fence_value(slot.fence);
        }

        slot.state = FrameSlotState::Recording;
        index
    }

    /// Tags the current slot with the fence value of the work that reads it.
    pub fn end_frame(&mut self, fence: FenceValue) {
        let index = self.current;
        let slot = &mut self.slots[index];
        assert_eq!(
            slot.state,
            FrameSlotState::Recording,
            "end_frame on frame slot {index} which is not recording"
        );
        slot.fence = fence;
        slot.state = FrameSlotState::Submitted;
    }

    pub fn resources(&self) -> &T {
        &self.slots[self.current].resources
    }

    /// Resources of the slot being recorded.
    ///
    /// # Panics
    ///
    /// Panics outside of `begin_frame`/`end_frame`, when the GPU may still read the slot.
    pub fn resources_mut(&mut self) -> &mut T {
        let slot = &mut self.slots[self.current];
        assert_eq!(
            slot.state,
            FrameSlotState::Recording,
            "frame resources written outside of a recording frame"
        );
        &mut slot.resources
    }

    /// Waits for every submitted slot, leaving the ring idle.
    pub fn wait_all(&mut self, waiter: &impl FenceWaiter) {
        for slot in &mut self.slots {
            if slot.state == FrameSlotState::Submitted {
                waiter.wait_for_fence_value(slot.fence);
                slot.state = FrameSlotState::Idle;
            }
        }
    }
}

/// How an [`UploadBuffer`] is bound.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UploadKind {
    /// Elements are 256 byte aligned so each can be bound at a dynamic offset.
    Uniform,
    /// Elements are tightly packed as a runtime sized array.
    Storage,
}

/// Alignment of uniform buffer dynamic offsets.
pub const UNIFORM_ALIGNMENT: u64 = 256;

/// CPU written buffer of `count` shader structs.
pub struct UploadBuffer<T> {
    buffer: Buffer,
    kind: UploadKind,
    stride: u64,
    count: u32,
    _phantom: PhantomData<T>,
}

impl<T> UploadBuffer<T>
where
    T: ShaderType + ShaderSize + WriteInto,
{
    pub fn new(device: &Device, label: &str, kind: UploadKind, count: u32) -> Self {
        let stride = Self::stride_for(kind);
        let usage = match kind {
            UploadKind::Uniform => BufferUsages::UNIFORM,
            UploadKind::Storage => BufferUsages::STORAGE,
        } | BufferUsages::COPY_DST;

        Self {
            buffer: device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: stride * u64::from(count.max(1)),
                usage,
                mapped_at_creation: false,
            }),
            kind,
            stride,
            count,
            _phantom: PhantomData,
        }
    }

    pub fn stride_for(kind: UploadKind) -> u64 {
        match kind {
            UploadKind::Uniform => round_up_pot(T::SHADER_SIZE.get(), UNIFORM_ALIGNMENT),
            UploadKind::Storage => T::SHADER_SIZE.get(),
        }
    }

    /// Writes element `index`.
    pub fn copy_data(&self, queue: &Queue, index: u32, data: &T) -> Result<(), FrameResourceError> {
        self.check_index(index)?;

        let bytes = match self.kind {
            UploadKind::Uniform => {
                let mut buffer = UniformBuffer::new(Vec::with_capacity(self.stride as usize));
                buffer.write(data).map_err(|e| FrameResourceError::Encode(e.to_string()))?;
                buffer.into_inner()
            }
            UploadKind::Storage => {
                let mut buffer = StorageBuffer::new(Vec::with_capacity(self.stride as usize));
                buffer.write(data).map_err(|e| FrameResourceError::Encode(e.to_string()))?;
                buffer.into_inner()
            }
        };

        queue.write_buffer(&self.buffer, self.offset(index), &bytes);
        Ok(())
    }

    /// Writes consecutive elements starting at 0.
    pub fn copy_all(&self, queue: &Queue, data: &[T]) -> Result<(), FrameResourceError> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_index(data.len() as u32 - 1)?;

        match self.kind {
            UploadKind::Storage => {
                let mut buffer = StorageBuffer::new(Vec::with_capacity(self.stride as usize * data.len()));
                buffer.write(data).map_err(|e| FrameResourceError::Encode(e.to_string()))?;
                queue.write_buffer(&self.buffer, 0, &buffer.into_inner());
                Ok(())
            }
            UploadKind::Uniform => {
                for (index, element) in data.iter().enumerate() {
                    self.copy_data(queue, index as u32, element)?;
                }
                Ok(())
            }
        }
    }

    fn check_index(&self, index: u32) -> Result<(), FrameResourceError> {
        if index >= self.count {
            return Err(FrameResourceError::OutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(())
    }

    pub fn offset(&self, index: u32) -> u64 {
        u64::from(index) * self.stride
    }

    /// Binding of the single element `index`.
    pub fn element_binding(&self, index: u32) -> BufferBinding<'_> {
        BufferBinding {
            buffer: &self.buffer,
            offset: self.offset(index),
            size: NonZeroU64::new(T::SHADER_SIZE.get()),
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use encase::ShaderType;
    use glam::Vec4;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Wait(FenceValue),
        Copy(usize),
    }

    #[derive(Default)]
    struct MockQueue {
        completed: RefCell<FenceValue>,
        events: RefCell<Vec<Event>>,
    }

    impl FenceWaiter for MockQueue {
        fn is_fence_complete(&self, value: FenceValue) -> bool {
            *self.completed.borrow() >= value
        }

        fn wait_for_fence_value(&self, value: FenceValue) {
            self.events.borrow_mut().push(Event::Wait(value));
            let mut completed = self.completed.borrow_mut();
            *completed = (*completed).max(value);
        }
    }

    #[test]
    fn first_frame_uses_slot_zero() {
        let mut ring = FrameRing::new(vec![(), (), ()]);
        assert_eq!(ring.begin_frame(&MockQueue::default()), 0);
        assert_eq!(ring.state(0), FrameSlotState::Recording);
        assert_eq!(ring.state(1), FrameSlotState::Idle);
    }

    #[test]
    fn wait_precedes_copy_on_reused_slot() {
        let gpu = MockQueue::default();
        let mut ring = FrameRing::new(vec![0usize, 1, 2]);

        for frame in 1..=7u64 {
            let index = ring.begin_frame(&gpu);
            let slot = *ring.resources_mut();
            gpu.events.borrow_mut().push(Event::Copy(slot));
            assert_eq!(index, slot);
            ring.end_frame(frame);
        }

        let events = gpu.events.borrow();
        // The GPU never completes on its own, so every reuse waits on the slot's
        // own previous fence right before the copy.
        assert_eq!(
            *events,
            [
                Event::Copy(0),
                Event::Copy(1),
                Event::Copy(2),
                Event::Wait(1),
                Event::Copy(0),
                Event::Wait(2),
                Event::Copy(1),
                Event::Wait(3),
                Event::Copy(2),
                Event::Wait(4),
                Event::Copy(0),
            ]
        );
    }

    #[test]
    fn completed_slots_do_not_block() {
        let gpu = MockQueue::default();
        let mut ring = FrameRing::new(vec![(), ()]);

        ring.begin_frame(&gpu);
        ring.end_frame(1);
        ring.begin_frame(&gpu);
        ring.end_frame(2);

        *gpu.completed.borrow_mut() = 2;
        ring.begin_frame(&gpu);
        assert!(gpu.events.borrow().is_empty());
        assert_eq!(ring.state(1), FrameSlotState::Idle);
    }

    #[test]
    fn cpu_lead_is_bounded() {
        let gpu = MockQueue::default();
        let mut ring = FrameRing::new(vec![(); 3]);

        for frame in 1..=20u64 {
            ring.begin_frame(&gpu);
            let completed = *gpu.completed.borrow();
            // Recording frame `frame` requires frame `frame - 3` to be done.
            assert!(completed + 3 >= frame, "frame {frame} started with only {completed} complete");
            ring.end_frame(frame);
        }
    }

    #[test]
    #[should_panic(expected = "outside of a recording frame")]
    fn writing_a_submitted_slot_panics() {
        let gpu = MockQueue::default();
        let mut ring = FrameRing::new(vec![0u32]);
        ring.begin_frame(&gpu);
        ring.end_frame(1);
        *ring.resources_mut() = 5;
    }

    #[test]
    fn wait_all_idles_the_ring() {
        let gpu = MockQueue::default();
        let mut ring = FrameRing::new(vec![(); 3]);
        for frame in 1..=2 {
            ring.begin_frame(&gpu);
            ring.end_frame(frame);
        }
        ring.wait_all(&gpu);
        assert_eq!(*gpu.events.borrow(), [Event::Wait(1), Event::Wait(2)]);
        assert!((0..3).all(|i| ring.state(i) == FrameSlotState::Idle));
    }

    #[derive(ShaderType)]
    struct Constants {
        color: Vec4,
        scale: f32,
    }

    #[test]
    fn strides() {
        assert_eq!(UploadBuffer::<Constants>::stride_for(UploadKind::Uniform), 256);
        assert_eq!(UploadBuffer::<Constants>::stride_for(UploadKind::Storage), 32);
    }
}
