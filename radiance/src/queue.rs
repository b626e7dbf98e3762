//! Command submission and fence based completion tracking.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};
use wgpu::{Buffer, CommandEncoder, CommandEncoderDescriptor, Device, Maintain, Queue, Texture};

use crate::format_sso;

/// A point in queue execution order. Zero is complete from the start.
pub type FenceValue = u64;

/// Monotonic completion counter.
///
/// The queue bumps it from its submitted-work-done callbacks, the CPU reads or
/// blocks on it.
pub struct Fence {
    completed: Mutex<FenceValue>,
    condvar: Condvar,
}

impl Fence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            completed: Mutex::new(0),
            condvar: Condvar::new(),
        })
    }

    pub fn completed_value(&self) -> FenceValue {
        *self.completed.lock()
    }

    pub fn is_complete(&self, value: FenceValue) -> bool {
        *self.completed.lock() >= value
    }

    /// Records that the queue reached `value`. Never moves backwards.
    pub fn complete(&self, value: FenceValue) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.condvar.notify_all();
        }
    }

    /// Blocks until `value` completes.
    pub fn wait(&self, value: FenceValue) {
        let mut completed = self.completed.lock();
        while *completed < value {
            self.condvar.wait(&mut completed);
        }
    }

    /// Blocks until `value` completes or `timeout` passes. Returns whether `value` completed.
    pub fn wait_timeout(&self, value: FenceValue, timeout: Duration) -> bool {
        let mut completed = self.completed.lock();
        while *completed < value {
            if self.condvar.wait_for(&mut completed, timeout).timed_out() {
                return *completed >= value;
            }
        }
        true
    }
}

/// Anything that can answer for and block on fence values.
pub trait FenceWaiter {
    fn is_fence_complete(&self, value: FenceValue) -> bool;
    fn wait_for_fence_value(&self, value: FenceValue);
}

impl FenceWaiter for Fence {
    fn is_fence_complete(&self, value: FenceValue) -> bool {
        self.is_complete(value)
    }

    fn wait_for_fence_value(&self, value: FenceValue) {
        self.wait(value)
    }
}

/// Recycles allocators once the fence value they were retired with completes.
///
/// Allocators are retired in submission order, so only the front of the queue
/// ever needs checking.
pub struct AllocatorPool<A> {
    retired: VecDeque<(FenceValue, A)>,
    created: usize,
}

impl<A> AllocatorPool<A> {
    pub fn new() -> Self {
        Self {
            retired: VecDeque::new(),
            created: 0,
        }
    }

    /// Reuses the oldest retired allocator if `is_complete` confirms its fence, else creates one.
    pub fn acquire(&mut self, is_complete: impl FnOnce(FenceValue) -> bool, create: impl FnOnce(usize) -> A) -> A {
        if let Some(&(fence_value, _)) = self.retired.front() {
            if is_complete(fence_value) {
                if let Some((_, allocator)) = self.retired.pop_front() {
                    return allocator;
                }
            }
        }

        let index = self.created;
        self.created += 1;
        create(index)
    }

    pub fn release(&mut self, fence_value: FenceValue, allocator: A) {
        debug_assert!(
            self.retired.back().map_or(true, |&(last, _)| last <= fence_value),
            "allocators must be retired in fence order"
        );
        self.retired.push_back((fence_value, allocator));
    }

    /// Number of allocators ever created.
    pub fn created(&self) -> usize {
        self.created
    }

    /// Number of allocators waiting on their fence.
    pub fn retired(&self) -> usize {
        self.retired.len()
    }
}

impl<A> Default for AllocatorPool<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resources that have to outlive the GPU work recorded against them.
pub enum RetainedResource {
    Buffer(Buffer),
    Texture(Texture),
}

/// Backing storage of a command list. Only reset once the GPU is done with it.
pub struct CommandAllocator {
    index: usize,
    retained: Vec<RetainedResource>,
}

impl CommandAllocator {
    fn new(index: usize) -> Self {
        Self {
            index,
            retained: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.retained.clear();
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// An open command list: a fresh encoder recording against a recycled allocator.
pub struct CommandList {
    allocator: CommandAllocator,
    encoder: CommandEncoder,
}

impl CommandList {
    pub fn encoder(&mut self) -> &mut CommandEncoder {
        &mut self.encoder
    }

    pub fn allocator_index(&self) -> usize {
        self.allocator.index
    }

    /// Keeps `resource` alive until this list's work completes.
    pub fn retain(&mut self, resource: RetainedResource) {
        self.allocator.retained.push(resource);
    }
}

/// FIFO submission queue paired with a monotonically increasing fence.
pub struct CommandQueue {
    device: Arc<Device>,
    queue: Arc<Queue>,
    fence: Arc<Fence>,
    fence_value: FenceValue,
    allocators: AllocatorPool<CommandAllocator>,
}

impl CommandQueue {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self {
            device,
            queue,
            fence: Fence::new(),
            fence_value: 0,
            allocators: AllocatorPool::new(),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Returns a list ready to record, reusing an allocator whose work has completed.
    pub fn get_free_command_list(&mut self) -> CommandList {
        profiling::scope!("CommandQueue::get_free_command_list");

        let fence = &self.fence;
        let device = &self.device;
        let mut allocator = self.allocators.acquire(
            |value| {
                device.poll(Maintain::Poll);
                fence.is_complete(value)
            },
            |index| {
                log::debug!("Creating command allocator {index}");
                CommandAllocator::new(index)
            },
        );
        allocator.reset();

        let label = format_sso!("command list {}", allocator.index);
        let encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some(&label) });

        CommandList { allocator, encoder }
    }

    /// Closes and submits `list`. Its allocator is held back until the returned value completes.
    pub fn execute_command_list(&mut self, list: CommandList) -> FenceValue {
        profiling::scope!("CommandQueue::execute_command_list");

        let CommandList { allocator, encoder } = list;
        self.queue.submit(Some(encoder.finish()));

        let fence_value = self.signal();
        self.allocators.release(fence_value, allocator);
        fence_value
    }

    /// Queues a fence signal after all work submitted so far.
    pub fn signal(&mut self) -> FenceValue {
        self.fence_value += 1;
        let fence_value = self.fence_value;

        let fence = Arc::clone(&self.fence);
        self.queue
            .on_submitted_work_done(move || fence.complete(fence_value));

        log::trace!("Signaled fence value {fence_value}");
        fence_value
    }

    pub fn is_fence_complete(&self, value: FenceValue) -> bool {
        if self.fence.is_complete(value) {
            return true;
        }
        self.device.poll(Maintain::Poll);
        self.fence.is_complete(value)
    }

    /// Blocks the calling thread until the queue reaches `value`.
    pub fn wait_for_fence_value(&self, value: FenceValue) {
        assert!(
            value <= self.fence_value,
            "waiting on fence value {value} which was never signaled (last signaled {})",
            self.fence_value
        );
        if self.fence.is_complete(value) {
            return;
        }

        profiling::scope!("CommandQueue::wait_for_fence_value");
        log::trace!("Waiting on fence value {value}");
        self.device.poll(Maintain::Wait);
        self.fence.wait(value);
    }

    /// Waits for every piece of submitted work.
    pub fn flush(&mut self) {
        let value = self.signal();
        self.wait_for_fence_value(value);
    }

    pub fn completed_value(&self) -> FenceValue {
        self.fence.completed_value()
    }

    pub fn last_signaled_value(&self) -> FenceValue {
        self.fence_value
    }

    /// Number of command allocators created so far.
    pub fn allocator_count(&self) -> usize {
        self.allocators.created()
    }
}

impl FenceWaiter for CommandQueue {
    fn is_fence_complete(&self, value: FenceValue) -> bool {
        CommandQueue::is_fence_complete(self, value)
    }

    fn wait_for_fence_value(&self, value: FenceValue) {
        CommandQueue::wait_for_fence_value(self, value)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use super::*;

    #[test]
    fn fence_completes_in_order() {
        let fence = Fence::new();
        assert!(fence.is_complete(0));
        assert!(!fence.is_complete(1));

        fence.complete(1);
        fence.complete(3);
        assert!(fence.is_complete(2));
        assert!(fence.is_complete(3));
        assert!(!fence.is_complete(4));

        fence.complete(2);
        assert_eq!(fence.completed_value(), 3);
    }

    #[test]
    fn fence_wait_blocks_until_value() {
        let fence = Fence::new();
        let (sender, receiver) = mpsc::channel();

        let waiter_fence = Arc::clone(&fence);
        let waiter = thread::spawn(move || {
            waiter_fence.wait(2);
            sender.send(waiter_fence.completed_value()).unwrap();
        });

        fence.complete(1);
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!fence.is_complete(2));

        fence.complete(2);
        let observed = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(observed >= 2);
        waiter.join().unwrap();
    }

    #[test]
    fn fence_wait_timeout() {
        let fence = Fence::new();
        assert!(!fence.wait_timeout(1, Duration::from_millis(10)));
        fence.complete(1);
        assert!(fence.wait_timeout(1, Duration::from_millis(10)));
    }

    #[test]
    fn pool_reuses_only_completed_allocators() {
        let fence = Fence::new();
        let mut pool = AllocatorPool::new();

        let a = pool.acquire(|v| fence.is_complete(v), |i| i);
        let b = pool.acquire(|v| fence.is_complete(v), |i| i);
        assert_eq!((a, b), (0, 1));

        pool.release(1, a);
        pool.release(2, b);

        // Neither fence value has completed yet.
        let c = pool.acquire(|v| fence.is_complete(v), |i| i);
        assert_eq!(c, 2);
        assert_eq!(pool.created(), 3);

        fence.complete(1);
        let d = pool.acquire(|v| fence.is_complete(v), |i| i);
        assert_eq!(d, 0);

        // Value 2 is still in flight.
        let e = pool.acquire(|v| fence.is_complete(v), |i| i);
        assert_eq!(e, 3);
        assert_eq!(pool.retired(), 1);
    }

    #[test]
    fn pool_steady_state_is_bounded() {
        let fence = Fence::new();
        let mut pool = AllocatorPool::new();

        for frame in 1..=100u64 {
            let allocator = pool.acquire(|v| fence.is_complete(v), |i| i);
            pool.release(frame, allocator);
            // GPU runs two frames behind.
            if frame > 2 {
                fence.complete(frame - 2);
            }
        }

        assert_eq!(pool.created(), 3);
    }
}
