use std::ops::{Deref, DerefMut};

use anyhow::{ensure, Context, Result};
use radiance::{
    create_iad, types::RenderSettings, BackBuffer, InstanceAdapterDevice, ManualClock, RendererConfig,
};
use radiance_routine::{ibl::IblSizes, Renderer, RendererNewArgs};
use wgpu::{BufferDescriptor, BufferUsages, ImageCopyBuffer, ImageDataLayout, Maintain, MapMode};

/// Bytes per texel of the back buffer format.
const BACK_BUFFER_TEXEL_SIZE: u32 = 8;

pub struct TestRunnerBuilder {
    size: u32,
    config: RendererConfig,
    settings: RenderSettings,
    iad: Option<InstanceAdapterDevice>,
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self {
            size: 64,
            config: RendererConfig {
                shadow_map_size: 512,
                voxel_dimension: 32,
                ..RendererConfig::default()
            },
            settings: RenderSettings::default(),
            iad: None,
        }
    }
}

impl TestRunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Width and height of the offscreen back buffers.
    pub fn size(mut self, size: u32) -> Result<Self> {
        ensure!(size % 32 == 0, "Size must be a multiple of 32, is {}", size);
        self.size = size;
        Ok(self)
    }

    pub fn config(mut self, config: RendererConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn iad(mut self, iad: InstanceAdapterDevice) -> Self {
        self.iad = Some(iad);
        self
    }

    pub async fn build(self) -> Result<TestRunner> {
        let _ = env_logger::builder().is_test(true).try_init();

        let iad = match self.iad {
            Some(iad) => iad,
            None => create_iad(None, None, &self.config)
                .await
                .context("InstanceAdapterDevice creation failed")?,
        };

        let renderer = Renderer::new(RendererNewArgs {
            iad,
            surface: None,
            config: self.config,
            settings: self.settings,
            width: self.size,
            height: self.size,
            ibl_sizes: IblSizes {
                environment: 64,
                irradiance: 8,
                brdf_lut: 32,
            },
        })
        .context("Renderer initialization failed")?;

        Ok(TestRunner {
            renderer,
            clock: ManualClock::default(),
        })
    }
}

/// An offscreen renderer driven by a manual clock.
pub struct TestRunner {
    pub renderer: Renderer,
    pub clock: ManualClock,
}

impl Deref for TestRunner {
    type Target = Renderer;

    fn deref(&self) -> &Self::Target {
        &self.renderer
    }
}

impl DerefMut for TestRunner {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.renderer
    }
}

impl TestRunner {
    pub fn builder() -> TestRunnerBuilder {
        TestRunnerBuilder::new()
    }

    /// Advances the clock by a sixtieth of a second and renders a frame.
    pub fn render_frame(&mut self) -> Result<()> {
        self.clock.advance(1.0 / 60.0);
        self.renderer.render_frame(&self.clock).context("Frame failed")
    }

    /// Raw `Rgba16Float` texels of the back buffer the last frame rendered into.
    pub async fn read_back_buffer(&self) -> Result<Vec<u8>> {
        let context = self.renderer.context();
        let back_buffer: &BackBuffer = context.back_buffer(self.renderer.current_frame_index());
        let extent = back_buffer.texture.info().extent();
        let bytes_per_row = extent.width * BACK_BUFFER_TEXEL_SIZE;
        let device = &context.iad.device;

        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some("Test readback buffer"),
            size: (bytes_per_row * extent.height) as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Test readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            back_buffer.texture.raw().as_image_copy(),
            ImageCopyBuffer {
                buffer: &buffer,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            extent,
        );
        let submit_index = context.iad.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = flume::bounded(1);
        buffer.slice(..).map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(Maintain::WaitForSubmissionIndex(submit_index));

        receiver
            .recv_async()
            .await
            .context("Failed to recieve message from map_async")?
            .context("Mapping the readback buffer failed")?;

        let mapping = buffer.slice(..).get_mapped_range();
        Ok(mapping.to_vec())
    }
}
