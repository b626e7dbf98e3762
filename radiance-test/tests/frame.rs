use glam::{Mat4, Vec4};
use radiance::{FrameSlotState, ResourceState, Transition};
use radiance_test::{cube, no_gpu_return, test_attr, NoImages, TestRunner};

fn position(transitions: &[Transition], resource: &str, after: ResourceState) -> usize {
    transitions
        .iter()
        .position(|t| t.resource.as_str() == resource && t.after == after)
        .unwrap_or_else(|| panic!("no transition of {resource} to {after:?} in {transitions:#?}"))
}

#[test_attr]
pub async fn first_frame_orders_passes() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.add_mesh("cube", &cube(Vec4::ONE), Mat4::IDENTITY, &NoImages)?;
    runner.take_transitions();

    runner.render_frame()?;
    let transitions = runner.take_transitions();

    let first = transitions.first().expect("frame recorded no transitions");
    assert_eq!(first.resource.as_str(), "back buffer 0");
    assert_eq!(first.before, ResourceState::PRESENT);
    assert_eq!(first.after, ResourceState::RENDER_TARGET);
    let last = transitions.last().expect("frame recorded no transitions");
    assert_eq!(last.resource.as_str(), "back buffer 0");
    assert_eq!(last.after, ResourceState::PRESENT);

    let shadow = position(&transitions, "cascaded shadow map", ResourceState::DEPTH_WRITE);
    let voxelize = position(&transitions, "voxel radiance", ResourceState::UNORDERED_ACCESS);
    let gbuffer = position(&transitions, "gbuffer albedo", ResourceState::RENDER_TARGET);
    let gbuffer_read = position(&transitions, "gbuffer albedo", ResourceState::PIXEL_SHADER_RESOURCE);
    let history = position(&transitions, "taa history", ResourceState::COPY_DEST);
    assert!(shadow < voxelize);
    assert!(voxelize < gbuffer);
    assert!(gbuffer < gbuffer_read);
    assert!(gbuffer_read < history);

    // The history is only seeded on the first frame, the resolve reads it from the second frame on.
    assert!(transitions
        .iter()
        .all(|t| t.resource.as_str() != "taa source"));
    runner.render_frame()?;
    let transitions = runner.take_transitions();
    position(&transitions, "taa source", ResourceState::COPY_DEST);

    Ok(())
}

#[test_attr]
pub async fn frames_rotate_through_the_ring() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    let frames = runner.config().frames_in_flight as usize;

    for frame in 0..frames * 2 {
        runner.render_frame()?;
        assert_eq!(runner.current_frame_index(), frame % frames);
        let state = runner.frame_ring().state(frame % frames);
        assert!(matches!(state, FrameSlotState::Submitted | FrameSlotState::Idle));
    }
    assert_eq!(runner.frame_count(), (frames * 2) as u64);

    let ring = runner.frame_ring();
    let fences: Vec<_> = (0..frames).map(|slot| ring.fence(slot)).collect();
    assert!(fences.windows(2).all(|pair| pair[0] < pair[1]));

    Ok(())
}

#[test_attr]
pub async fn frame_writes_the_back_buffer() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.add_mesh("cube", &cube(Vec4::new(0.8, 0.2, 0.2, 1.0)), Mat4::IDENTITY, &NoImages)?;

    runner.render_frame()?;
    let texels = runner.read_back_buffer().await?;
    assert!(texels.iter().any(|&byte| byte != 0), "back buffer is still cleared");

    Ok(())
}

#[test_attr]
pub async fn transition_log_holds_only_the_latest_frame() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.add_mesh("cube", &cube(Vec4::ONE), Mat4::IDENTITY, &NoImages)?;

    runner.render_frame()?;
    runner.render_frame()?;
    let per_frame = runner.take_transitions().len();
    assert!(per_frame > 0);

    for _ in 0..10 {
        runner.render_frame()?;
    }
    let transitions = runner.take_transitions();
    assert_eq!(transitions.len(), per_frame);
    let back_buffer = format!("back buffer {}", runner.current_frame_index());
    assert_eq!(transitions[0].resource.as_str(), back_buffer);

    Ok(())
}
