use std::sync::Arc;

use arrayvec::ArrayVec;
use wgpu::{
    Adapter, AdapterInfo, Backend, Backends, Device, DeviceDescriptor, DeviceType, Features, Instance,
    InstanceDescriptor, Limits, Queue,
};

use crate::{util::typedefs::FastHashMap, LimitType, RendererConfig, RendererInitializationError};

/// Features the renderer cannot run without.
pub const REQUIRED_FEATURES: Features = Features::from_bits_truncate(
    Features::PUSH_CONSTANTS.bits()
        | Features::TEXTURE_BINDING_ARRAY.bits()
        | Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING.bits(),
);

/// Features that are used when available.
pub const OPTIONAL_FEATURES: Features = Features::CONSERVATIVE_RASTERIZATION;

/// Number of render targets the g-buffer pass writes at once.
pub const GBUFFER_TARGETS: u32 = 6;
/// Bytes per sample of the g-buffer attachments, including format alignment.
pub const GBUFFER_BYTES_PER_SAMPLE: u32 = 30;

/// Color attachments wgpu allows in a single render pass. Not part of `Limits` in this wgpu version.
pub const MAX_COLOR_ATTACHMENTS: u32 = 8;
/// WebGPU's default budget of bytes per sample across all color attachments of a pass.
pub const MAX_COLOR_ATTACHMENT_BYTES_PER_SAMPLE: u32 = 32;

const _: () = assert!(GBUFFER_TARGETS <= MAX_COLOR_ATTACHMENTS);
const _: () = assert!(GBUFFER_BYTES_PER_SAMPLE <= MAX_COLOR_ATTACHMENT_BYTES_PER_SAMPLE);

/// Check that all required features are present in the feature set given.
pub fn check_features(device: Features) -> Result<Features, RendererInitializationError> {
    let optional = OPTIONAL_FEATURES & device;
    let missing = REQUIRED_FEATURES - device;
    if !missing.is_empty() {
        Err(RendererInitializationError::MissingDeviceFeatures { features: missing })
    } else {
        Ok(REQUIRED_FEATURES | optional)
    }
}

fn check_limit(device: u32, required: u32, ty: LimitType) -> Result<(), RendererInitializationError> {
    check_limit_u64(device as u64, required as u64, ty)
}

fn check_limit_u64(device: u64, required: u64, ty: LimitType) -> Result<(), RendererInitializationError> {
    if device < required {
        Err(RendererInitializationError::LowDeviceLimit {
            ty,
            device_limit: device,
            required_limit: required,
        })
    } else {
        Ok(())
    }
}

/// Check that the device can hold everything `config` sizes the renderer for.
///
/// Returns the limits to request, which are the device's own.
pub fn check_limits(device_limits: &Limits, config: &RendererConfig) -> Result<Limits, RendererInitializationError> {
    let voxel_count = (config.voxel_dimension as u64).pow(3);

    check_limit(device_limits.max_bind_groups, 4, LimitType::BindGroups)?;
    check_limit(
        device_limits.max_sampled_textures_per_shader_stage,
        config.srv_heap_capacity * 4 + 16,
        LimitType::SampledTexturesPerShaderStages,
    )?;
    check_limit(
        device_limits.max_storage_buffers_per_shader_stage,
        4,
        LimitType::StorageBuffersPerShaderStages,
    )?;
    check_limit(
        device_limits.max_storage_textures_per_shader_stage,
        1,
        LimitType::StorageTexturesPerShaderStages,
    )?;
    // Four atomic u32 accumulators per voxel.
    check_limit_u64(
        device_limits.max_storage_buffer_binding_size as u64,
        voxel_count * 16,
        LimitType::MaxStorageBufferBindingSize,
    )?;
    check_limit(
        device_limits.max_push_constant_size,
        crate::PUSH_CONSTANT_SIZE,
        LimitType::PushConstantSize,
    )?;
    check_limit(
        device_limits.max_texture_dimension_2d,
        config.shadow_map_size,
        LimitType::MaxTextureDimension2d,
    )?;
    check_limit(
        device_limits.max_texture_dimension_3d,
        config.voxel_dimension,
        LimitType::MaxTextureDimension3d,
    )?;
    check_limit(device_limits.max_texture_array_layers, 6, LimitType::MaxTextureArrayLayers)?;

    Ok(device_limits.clone())
}

/// Validated set of features and limits for a given T.
pub struct PotentialAdapter<T> {
    pub inner: T,
    pub info: AdapterInfo,
    pub features: Features,
    pub limits: Limits,
}
impl<T> PotentialAdapter<T> {
    pub fn new(
        inner: T,
        info: AdapterInfo,
        inner_limits: Limits,
        inner_features: Features,
        config: &RendererConfig,
    ) -> Result<Self, RendererInitializationError> {
        Ok(PotentialAdapter {
            inner,
            info,
            features: check_features(inner_features)?,
            limits: check_limits(&inner_limits, config)?,
        })
    }
}

/// Container for Instance/Adapter/Device/Queue etc.
///
/// Create these yourself, or call [`create_iad`].
pub struct InstanceAdapterDevice {
    pub instance: Arc<Instance>,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub info: AdapterInfo,
    pub features: Features,
    pub limits: Limits,
}

/// Creates an Instance/Adapter/Device/Queue using the given choices. Tries to get the best combination.
pub async fn create_iad(
    desired_backend: Option<Backend>,
    desired_device: Option<String>,
    config: &RendererConfig,
) -> Result<InstanceAdapterDevice, RendererInitializationError> {
    profiling::scope!("create_iad");

    let backend_bits = Backends::VULKAN | Backends::DX12 | Backends::METAL | Backends::GL;
    let default_backend_order = [Backend::Vulkan, Backend::Metal, Backend::Dx12, Backend::Gl];

    let instance = Instance::new(InstanceDescriptor {
        backends: backend_bits,
        ..Default::default()
    });

    let mut valid_adapters = FastHashMap::default();

    for backend in &default_backend_order {
        let adapters = instance.enumerate_adapters(Backends::from(*backend));

        let mut potential_adapters = ArrayVec::<PotentialAdapter<Adapter>, 4>::new();
        for (idx, adapter) in adapters.into_iter().enumerate() {
            let info = adapter.get_info();
            let limits = adapter.limits();
            let features = adapter.features();
            let potential = PotentialAdapter::new(adapter, info, limits, features, config);

            log::debug!(
                "{:?} Adapter {}: {:#?}",
                backend,
                idx,
                potential.as_ref().map(|p| &p.info)
            );

            let desired = if let Some(ref desired_device) = desired_device {
                potential
                    .as_ref()
                    .map(|i| i.info.name.to_lowercase().contains(desired_device))
                    .unwrap_or(false)
            } else {
                true
            };

            match (potential, desired) {
                (Ok(potential), true) => {
                    if potential_adapters.try_push(potential).is_err() {
                        log::debug!("Ignoring adapter, already have four on this backend");
                    }
                }
                (Err(e), _) => log::debug!("Adapter not usable: {e}"),
                (Ok(_), false) => log::debug!("Adapter not wanted"),
            }
        }
        valid_adapters.insert(*backend, potential_adapters);
    }

    for backend_adapters in valid_adapters.values_mut() {
        backend_adapters.sort_by_key(|a: &PotentialAdapter<Adapter>| match a.info.device_type {
            DeviceType::DiscreteGpu => 0,
            DeviceType::IntegratedGpu => 1,
            DeviceType::VirtualGpu => 2,
            DeviceType::Cpu => 3,
            DeviceType::Other => 4,
        });
    }

    for backend in &default_backend_order {
        if let Some(desired_backend) = desired_backend {
            if desired_backend != *backend {
                log::debug!("Skipping unwanted backend {:?}", backend);
                continue;
            }
        }

        let adapter: Option<PotentialAdapter<Adapter>> =
            valid_adapters.remove(backend).and_then(|arr| arr.into_iter().next());

        if let Some(adapter) = adapter {
            log::info!("Chosen adapter: {} ({:?})", adapter.info.name, backend);
            log::debug!("Chosen features: {:#?}", adapter.features);
            log::debug!("Chosen limits: {:#?}", adapter.limits);

            let (device, queue) = adapter
                .inner
                .request_device(
                    &DeviceDescriptor {
                        label: Some("radiance device"),
                        required_features: adapter.features,
                        required_limits: adapter.limits.clone(),
                    },
                    None,
                )
                .await
                .map_err(|_| RendererInitializationError::RequestDeviceFailed)?;

            return Ok(InstanceAdapterDevice {
                instance: Arc::new(instance),
                adapter: Arc::new(adapter.inner),
                device: Arc::new(device),
                queue: Arc::new(queue),
                info: adapter.info,
                features: adapter.features,
                limits: adapter.limits,
            });
        }
    }

    Err(RendererInitializationError::MissingAdapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable_limits() -> Limits {
        Limits {
            max_sampled_textures_per_shader_stage: 1 << 16,
            max_storage_buffer_binding_size: 1 << 30,
            max_push_constant_size: 128,
            max_texture_dimension_2d: 8192,
            max_texture_dimension_3d: 2048,
            ..Limits::default()
        }
    }

    #[test]
    fn missing_features_are_reported() {
        let err = check_features(Features::PUSH_CONSTANTS).unwrap_err();
        match err {
            RendererInitializationError::MissingDeviceFeatures { features } => {
                assert!(features.contains(Features::TEXTURE_BINDING_ARRAY));
                assert!(!features.contains(Features::PUSH_CONSTANTS));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn optional_features_are_picked_up() {
        let features = check_features(REQUIRED_FEATURES | Features::CONSERVATIVE_RASTERIZATION).unwrap();
        assert!(features.contains(Features::CONSERVATIVE_RASTERIZATION));
        let features = check_features(REQUIRED_FEATURES | Features::TIMESTAMP_QUERY).unwrap();
        assert_eq!(features, REQUIRED_FEATURES);
    }

    #[test]
    fn limits_scale_with_config() {
        let config = RendererConfig::default();
        assert!(check_limits(&capable_limits(), &config).is_ok());

        let low = Limits {
            max_push_constant_size: 64,
            ..capable_limits()
        };
        assert!(matches!(
            check_limits(&low, &config),
            Err(RendererInitializationError::LowDeviceLimit {
                ty: LimitType::PushConstantSize,
                device_limit: 64,
                required_limit: 128,
            })
        ));

        let big_volume = RendererConfig {
            voxel_dimension: 4096,
            ..config
        };
        assert!(check_limits(&capable_limits(), &big_volume).is_err());
    }
}
