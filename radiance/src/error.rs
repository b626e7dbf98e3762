use thiserror::Error;
use wgpu::{Features, TextureFormat};

use crate::{util::typedefs::SsoString, DescriptorHeapKind, ResourceState};

/// Enum mapping to each of a device's limit.
#[derive(Debug)]
pub enum LimitType {
    BindGroups,
    SampledTexturesPerShaderStages,
    StorageBuffersPerShaderStages,
    StorageTexturesPerShaderStages,
    MaxStorageBufferBindingSize,
    PushConstantSize,
    MaxTextureDimension2d,
    MaxTextureDimension3d,
    MaxTextureArrayLayers,
}

/// Reason why the renderer failed to initialize.
#[derive(Error, Debug)]
pub enum RendererInitializationError {
    #[error("No supported adapter found")]
    MissingAdapter,
    #[error("The device limit of {:?} is {} but renderer requires at least {}", ty, device_limit, required_limit)]
    LowDeviceLimit {
        ty: LimitType,
        device_limit: u64,
        required_limit: u64,
    },
    #[error("Device is missing required features: {:?}", features)]
    MissingDeviceFeatures { features: Features },
    #[error("Requesting a device failed")]
    RequestDeviceFailed,
    #[error("Invalid renderer configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Failed to build pipelines")]
    Pipeline(#[from] PipelineError),
    #[error("Descriptor heaps are too small for the startup resources")]
    Descriptors(#[from] DescriptorHeapError),
}

/// A descriptor heap ran out of slots. Heaps are sized once at startup, so this is a sizing bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorHeapError {
    #[error("{kind:?} descriptor heap exhausted: all {capacity} slots are allocated")]
    Exhausted { kind: DescriptorHeapKind, capacity: u32 },
}

/// Failure to build a shader module or pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to preprocess shader {name}: {reason}")]
    ShaderPreprocess { name: SsoString, reason: String },
    #[error("Failed to compile shader {name}: {reason}")]
    ShaderCompile { name: SsoString, reason: String },
    #[error("Failed to create pipeline {name}: {reason}")]
    PipelineCreation { name: SsoString, reason: String },
    #[error("No pipeline named {0} is registered")]
    MissingPipeline(SsoString),
    #[error("Pipeline {0} is registered with a different kind")]
    WrongPipelineKind(SsoString),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceStateError {
    #[error("Resource {resource} was never registered with the state tracker")]
    Unknown { resource: SsoString },
    #[error("Resource {resource} is in state {actual:?} but {expected:?} is required")]
    Unexpected {
        resource: SsoString,
        expected: ResourceState,
        actual: ResourceState,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MipmapError {
    #[error("Mipmaps can only be generated for square power of two textures, got {width}x{height}")]
    NotSquarePowerOfTwo { width: u32, height: u32 },
    #[error("No mipmap pipeline for format {0:?}")]
    UnsupportedFormat(TextureFormat),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameResourceError {
    #[error("Failed to encode constants: {0}")]
    Encode(String),
    #[error("Constant buffer index {index} out of range, buffer holds {count} elements")]
    OutOfRange { index: u32, count: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn errors_cross_threads() {
        assert_send_sync::<RendererInitializationError>();
        assert_send_sync::<PipelineError>();
        assert_send_sync::<DescriptorHeapError>();
        assert_send_sync::<ResourceStateError>();
        assert_send_sync::<MipmapError>();
        assert_send_sync::<FrameResourceError>();
    }

    #[test]
    fn pipeline_errors_carry_the_reason() {
        let error = PipelineError::ShaderCompile {
            name: "lighting".into(),
            reason: String::from("unknown identifier `albedo`"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to compile shader lighting: unknown identifier `albedo`"
        );
    }
}
