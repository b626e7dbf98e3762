use anyhow::Context;
use radiance::{
    create_iad, CommandQueue, FenceWaiter, FrameRing, FrameSlotState, RendererConfig, RetainedResource, Texture,
    TextureInfo,
};
use wgpu::{TextureFormat, TextureUsages};
use radiance_test::{no_gpu_return, test_attr};

#[test_attr]
pub async fn fence_values_increase_and_complete() -> anyhow::Result<()> {
    let iad = no_gpu_return!(create_iad(None, None, &RendererConfig::default())
        .await
        .context("InstanceAdapterDevice creation failed"));
    let mut queue = CommandQueue::new(iad.device.clone(), iad.queue.clone());

    let list = queue.get_free_command_list();
    let first = queue.execute_command_list(list);
    let list = queue.get_free_command_list();
    let second = queue.execute_command_list(list);
    assert!(second > first);
    assert_eq!(queue.last_signaled_value(), second);

    queue.wait_for_fence_value(second);
    assert!(queue.is_fence_complete(first));
    assert!(queue.is_fence_complete(second));

    queue.flush();
    assert_eq!(queue.completed_value(), queue.last_signaled_value());

    Ok(())
}

#[test_attr]
pub async fn allocators_are_recycled_after_completion() -> anyhow::Result<()> {
    let iad = no_gpu_return!(create_iad(None, None, &RendererConfig::default())
        .await
        .context("InstanceAdapterDevice creation failed"));
    let mut queue = CommandQueue::new(iad.device.clone(), iad.queue.clone());

    let mut allocators = Vec::new();
    for _ in 0..8 {
        let list = queue.get_free_command_list();
        allocators.push(list.allocator_index());
        queue.execute_command_list(list);
        queue.flush();
    }
    assert_eq!(queue.allocator_count(), 1);
    assert!(allocators.iter().all(|&index| index == allocators[0]));

    Ok(())
}

#[test_attr]
pub async fn lists_retain_textures_until_reused() -> anyhow::Result<()> {
    let iad = no_gpu_return!(create_iad(None, None, &RendererConfig::default())
        .await
        .context("InstanceAdapterDevice creation failed"));
    let mut queue = CommandQueue::new(iad.device.clone(), iad.queue.clone());

    let info = TextureInfo::d2(32, 16, TextureFormat::Rgba8Unorm, TextureUsages::COPY_DST);
    let texture = Texture::create(&iad.device, "retained", info);
    let extent = texture.info().extent();
    let raw = texture.into_raw();
    assert_eq!(raw.size(), extent);

    let mut list = queue.get_free_command_list();
    let allocator = list.allocator_index();
    list.retain(RetainedResource::Texture(raw));
    let fence = queue.execute_command_list(list);
    queue.wait_for_fence_value(fence);

    let list = queue.get_free_command_list();
    assert_eq!(list.allocator_index(), allocator);
    queue.execute_command_list(list);
    queue.flush();

    Ok(())
}

#[test_attr]
pub async fn frame_ring_waits_on_reused_slot() -> anyhow::Result<()> {
    let iad = no_gpu_return!(create_iad(None, None, &RendererConfig::default())
        .await
        .context("InstanceAdapterDevice creation failed"));
    let mut queue = CommandQueue::new(iad.device.clone(), iad.queue.clone());
    let mut ring = FrameRing::new(vec![(); 3]);

    let mut fences = Vec::new();
    for expected in [0, 1, 2] {
        let slot = ring.begin_frame(&queue);
        assert_eq!(slot, expected);
        let list = queue.get_free_command_list();
        let fence = queue.execute_command_list(list);
        ring.end_frame(fence);
        fences.push(fence);
    }

    // Reusing slot 0 blocks until its previous submission is done.
    assert_eq!(ring.begin_frame(&queue), 0);
    assert!(queue.is_fence_complete(fences[0]));
    assert_eq!(ring.state(0), FrameSlotState::Recording);
    ring.end_frame(queue.signal());

    ring.wait_all(&queue);
    for slot in 0..ring.len() {
        assert_eq!(ring.state(slot), FrameSlotState::Idle);
    }

    Ok(())
}
