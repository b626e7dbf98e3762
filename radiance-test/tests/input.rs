use glam::Vec3;
use radiance::{InputEvent, Keys};
use radiance_test::{no_gpu_return, test_attr, TestRunner};

#[test_attr]
pub async fn drag_turns_and_keys_move_the_camera() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    assert!(runner.context().is_offscreen());

    runner.camera_mut().set_position(Vec3::ZERO);
    let look = runner.camera().look();
    runner.handle_event(InputEvent::MouseDrag { dx: 90.0, dy: 0.0 });
    assert!(runner.camera().look().dot(look) < 0.99);

    runner.handle_event(InputEvent::Key {
        key: Keys::W,
        pressed: true,
    });
    runner.render_frame()?;
    let moved = runner.camera().position();
    assert!(moved.length() > 0.0);
    assert!(moved.normalize().dot(runner.camera().look()) > 0.99);

    runner.handle_event(InputEvent::Key {
        key: Keys::W,
        pressed: false,
    });
    runner.render_frame()?;
    assert_eq!(runner.camera().position(), moved);

    runner.handle_event(InputEvent::Resize { width: 96, height: 32 });
    assert_eq!(runner.context().width(), 96);
    assert_eq!(runner.context().height(), 32);
    runner.render_frame()?;

    Ok(())
}
