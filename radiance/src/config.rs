use serde::{Deserialize, Serialize};

use crate::RendererInitializationError;

/// Startup sizing of the renderer. Fixed for its whole lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub frames_in_flight: u32,
    pub rtv_heap_capacity: u32,
    pub dsv_heap_capacity: u32,
    /// Also the length of each bindless array.
    pub srv_heap_capacity: u32,
    pub shadow_map_size: u32,
    /// Voxels along each side of the GI volume.
    pub voxel_dimension: u32,
    pub object_capacity: u32,
    pub material_capacity: u32,
    pub light_capacity: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            rtv_heap_capacity: 128,
            dsv_heap_capacity: 16,
            srv_heap_capacity: 256,
            shadow_map_size: 4096,
            voxel_dimension: 128,
            object_capacity: 1024,
            material_capacity: 200,
            light_capacity: 1,
        }
    }
}

impl RendererConfig {
    pub fn validate(&self) -> Result<(), RendererInitializationError> {
        if self.frames_in_flight == 0 {
            return Err(RendererInitializationError::InvalidConfig(
                "frames_in_flight must be at least 1",
            ));
        }
        if !self.voxel_dimension.is_power_of_two() {
            return Err(RendererInitializationError::InvalidConfig(
                "voxel_dimension must be a power of two",
            ));
        }
        if !self.shadow_map_size.is_power_of_two() {
            return Err(RendererInitializationError::InvalidConfig(
                "shadow_map_size must be a power of two",
            ));
        }
        if self.light_capacity == 0 || self.material_capacity == 0 || self.object_capacity == 0 {
            return Err(RendererInitializationError::InvalidConfig(
                "object, material and light capacities must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.shadow_map_size, 4096);
        assert_eq!(config.material_capacity, 200);
    }

    #[test]
    fn rejects_bad_sizes() {
        let config = RendererConfig {
            voxel_dimension: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RendererInitializationError::InvalidConfig(_))
        ));

        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
