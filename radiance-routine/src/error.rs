use radiance::{
    types::AssetError, DescriptorHeapError, FrameResourceError, MipmapError, PipelineError,
    RendererInitializationError, ResourceStateError,
};
use thiserror::Error;

/// Failure while recording or submitting a frame.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("A pass ran against a resource in the wrong state")]
    State(#[from] ResourceStateError),
    #[error("Failed to upload frame constants")]
    FrameResource(#[from] FrameResourceError),
    #[error("Pipeline lookup failed")]
    Pipeline(#[from] PipelineError),
    #[error("Descriptor heap exhausted")]
    Descriptors(#[from] DescriptorHeapError),
    #[error("Failed to generate mipmaps")]
    Mipmap(#[from] MipmapError),
    #[error("Failed to acquire the next surface image")]
    Surface(#[from] wgpu::SurfaceError),
}

/// Failure while building the renderer or loading content into it.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Initialization(#[from] RendererInitializationError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("Scene holds more {what} than the configured capacity of {capacity}")]
    CapacityExceeded { what: &'static str, capacity: u32 },
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<PipelineError> for SetupError {
    fn from(e: PipelineError) -> Self {
        Self::Initialization(e.into())
    }
}

impl From<DescriptorHeapError> for SetupError {
    fn from(e: DescriptorHeapError) -> Self {
        Self::Initialization(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn errors_cross_threads() {
        assert_send_sync::<RenderError>();
        assert_send_sync::<SetupError>();
    }
}
