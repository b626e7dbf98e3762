use glam::{Mat4, Vec4};
use radiance::{
    types::{Antialiasing, Light, LightType, RenderSettings},
    ResourceState,
};
use radiance_routine::{ibl::procedural_sky, SetupError};
use radiance_test::{cube, no_gpu_return, test_attr, NoImages, TestRunner};

fn voxelized(transitions: &[radiance::Transition]) -> bool {
    transitions
        .iter()
        .any(|t| t.resource.as_str() == "voxel radiance" && t.after == ResourceState::UNORDERED_ACCESS)
}

#[test_attr]
pub async fn static_volume_is_voxelized_once() -> anyhow::Result<()> {
    let mut settings = RenderSettings::default();
    settings.vxgi.dynamic_update = false;
    let mut runner = no_gpu_return!(TestRunner::builder().settings(settings).build().await);
    runner.add_mesh("cube", &cube(Vec4::ONE), Mat4::IDENTITY, &NoImages)?;
    runner.take_transitions();

    runner.render_frame()?;
    assert!(voxelized(&runner.take_transitions()));
    runner.render_frame()?;
    assert!(!voxelized(&runner.take_transitions()));

    // New geometry invalidates the volume.
    runner.add_mesh("second cube", &cube(Vec4::ONE), Mat4::from_translation(glam::Vec3::X * 4.0), &NoImages)?;
    runner.render_frame()?;
    assert!(voxelized(&runner.take_transitions()));

    Ok(())
}

#[test_attr]
pub async fn voxel_debug_draws_without_lighting() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.add_mesh("cube", &cube(Vec4::ONE), Mat4::IDENTITY, &NoImages)?;
    runner.settings_mut().vxgi.debug_voxel = true;
    runner.take_transitions();

    runner.render_frame()?;
    let transitions = runner.take_transitions();
    assert!(voxelized(&transitions));
    // No ambient occlusion and no temporal resolve in debug mode.
    assert!(transitions.iter().all(|t| !t.resource.as_str().starts_with("ambient map")));
    assert!(transitions.iter().all(|t| !t.resource.as_str().starts_with("taa")));

    Ok(())
}

#[test_attr]
pub async fn every_post_mode_renders() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.add_mesh("cube", &cube(Vec4::ONE), Mat4::IDENTITY, &NoImages)?;

    for antialiasing in [Antialiasing::None, Antialiasing::Fxaa, Antialiasing::Taa] {
        for (motion_blur, tone_mapping) in [(false, false), (true, false), (false, true), (true, true)] {
            let post = &mut runner.settings_mut().post;
            post.antialiasing = antialiasing;
            post.motion_blur = motion_blur;
            post.tone_mapping = tone_mapping;
            runner.render_frame()?;
            assert_eq!(
                runner.state().state(runner.context().back_buffer(runner.current_frame_index()).texture.label()),
                Some(ResourceState::PRESENT)
            );
        }
    }

    Ok(())
}

#[test_attr]
pub async fn lights_are_capped_by_the_config() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    let capacity = runner.config().light_capacity as usize;
    assert_eq!(runner.lights().len(), 1);
    assert_eq!(runner.lights()[0].ty, LightType::Directional);

    let point = Light {
        ty: LightType::Point,
        range: 10.0,
        ..Light::sun(&runner.settings().sun)
    };
    for _ in 1..capacity {
        runner.add_light(point)?;
    }
    assert!(matches!(
        runner.add_light(point),
        Err(SetupError::CapacityExceeded { what: "lights", .. })
    ));

    Ok(())
}

#[test_attr]
pub async fn environment_can_be_replaced() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.set_environment(&procedural_sky(128, 64))?;
    runner.render_frame()?;

    Ok(())
}
