use anyhow::Context;
use radiance::{
    create_iad, Descriptors, RendererConfig, Texture, TextureInfo, ViewDesc, BACK_BUFFER_FORMAT,
};
use radiance_test::{no_gpu_return, test_attr, TestRunner};
use wgpu::{TextureUsages, TextureViewDimension};

#[test_attr]
pub async fn resize_rebuilds_views_in_place() -> anyhow::Result<()> {
    let iad = no_gpu_return!(create_iad(None, None, &RendererConfig::default())
        .await
        .context("InstanceAdapterDevice creation failed"));
    let mut descriptors = Descriptors::new(&iad.device, 4, 4, 8);

    let info = TextureInfo::d2(
        64,
        64,
        BACK_BUFFER_FORMAT,
        TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
    );
    let mut texture = Texture::create(&iad.device, "resized", info);
    let rtv = texture.create_view(&mut descriptors, ViewDesc::RenderTarget { mip: 0, layer: 0 })?;
    let srv = texture.create_view(&mut descriptors, ViewDesc::sampled(TextureViewDimension::D2))?;
    assert!(texture.views_current(&descriptors));

    texture.resize(&iad.device, 128, 32);
    assert!(!texture.views_current(&descriptors));
    assert_eq!(texture.info().extent().width, 128);
    assert_eq!(texture.info().extent().height, 32);

    texture.rebuild_views(&mut descriptors);
    assert!(texture.views_current(&descriptors));
    // Same slots, so bindless indices handed out before the resize stay valid.
    assert_eq!(texture.rtv(), Some(rtv));
    assert_eq!(texture.srv(), Some(srv));
    let view = descriptors.heap_view(srv).context("srv slot is empty")?;
    assert_eq!(view.generation, texture.generation());

    Ok(())
}

#[test_attr]
pub async fn renderer_resize_follows_the_window() -> anyhow::Result<()> {
    let mut runner = no_gpu_return!(TestRunner::builder().build().await);
    runner.render_frame()?;

    runner.resize(96, 32);
    assert_eq!(runner.context().width(), 96);
    assert_eq!(runner.context().height(), 32);
    assert_eq!(runner.context().depth().texture.info().extent().width, 96);
    assert!((runner.camera().aspect() - 3.0).abs() < 1e-5);
    for index in 0..runner.context().back_buffer_count() {
        let back_buffer = runner.context().back_buffer(index);
        assert!(back_buffer.texture.views_current(runner.descriptors()));
    }

    // G-buffer, ambient maps, TAA source and history, post scratch.
    let screen: Vec<_> = runner.screen_textures().collect();
    assert_eq!(screen.len(), 12);
    for texture in screen {
        assert!(texture.views_current(runner.descriptors()), "{} has stale views", texture.label());
        let extent = texture.info().extent();
        let expected = if texture.label().starts_with("ambient map") {
            (48, 16)
        } else {
            (96, 32)
        };
        assert_eq!((extent.width, extent.height), expected, "{} was not resized", texture.label());
    }

    // Zero sized windows are minimized and leave everything untouched.
    runner.resize(0, 32);
    assert_eq!(runner.context().width(), 96);

    runner.render_frame()?;
    let texels = runner.read_back_buffer().await?;
    assert_eq!(texels.len(), 96 * 32 * 8);

    Ok(())
}
