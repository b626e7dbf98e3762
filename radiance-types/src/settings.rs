use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Antialiasing technique applied after lighting.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Antialiasing {
    None,
    Fxaa,
    #[default]
    Taa,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub vsync: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Far end of the last cascade, in world units from the camera.
    pub max_shadow_distance: f32,
    /// Geometric growth of each cascade's depth range over the previous one.
    pub cascade_range_scale: f32,
    /// Fraction of the previous cascade's range that a cascade overlaps.
    pub cascade_transition_ratio: f32,
    pub shadow_softness: f32,
    pub show_cascades: bool,
    pub use_vogel_disk_sample: bool,
    pub num_samples: u32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            max_shadow_distance: 100.0,
            cascade_range_scale: 1.5,
            cascade_transition_ratio: 0.2,
            shadow_softness: 0.6,
            show_cascades: false,
            use_vogel_disk_sample: true,
            num_samples: 32,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSettings {
    pub antialiasing: Antialiasing,
    pub tone_mapping: bool,
    pub motion_blur: bool,
    pub motion_blur_amount: f32,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            antialiasing: Antialiasing::Taa,
            tone_mapping: true,
            motion_blur: true,
            motion_blur_amount: 0.25,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VxgiSettings {
    pub enable_gi: bool,
    pub debug_voxel: bool,
    /// Clear and revoxelize the scene every frame.
    pub dynamic_update: bool,
    pub debug_voxel_mip_level: u32,
    pub second_bounce: bool,
}

impl Default for VxgiSettings {
    fn default() -> Self {
        Self {
            enable_gi: true,
            debug_voxel: false,
            dynamic_update: true,
            debug_voxel_mip_level: 0,
            second_bounce: true,
        }
    }
}

/// Sun placement in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SunSettings {
    /// Azimuth.
    pub theta: f32,
    /// Angle from the zenith.
    pub phi: f32,
    pub intensity: f32,
}

impl Default for SunSettings {
    fn default() -> Self {
        Self {
            theta: 240.0,
            phi: 40.0,
            intensity: 3.0,
        }
    }
}

impl SunSettings {
    /// Direction the sunlight travels: the negated unit vector towards the sun.
    pub fn direction(&self) -> Vec3 {
        sun_direction(self.theta, self.phi)
    }
}

/// Converts sun angles in degrees into the direction its light travels.
pub fn sun_direction(theta_deg: f32, phi_deg: f32) -> Vec3 {
    let theta = theta_deg.to_radians();
    let phi = phi_deg.to_radians();

    let x = phi.sin() * theta.cos();
    let z = phi.sin() * theta.sin();
    let y = phi.cos();

    -Vec3::new(x, y, z)
}

/// Immutable snapshot of every tweakable rendering option.
///
/// The renderer copies this once per frame and hands a reference to each pass,
/// so a frame never observes a half-applied change.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub display: DisplaySettings,
    pub shadow: ShadowSettings,
    pub post: PostSettings,
    pub vxgi: VxgiSettings,
    pub sun: SunSettings,
}

impl RenderSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Whether temporal accumulation runs this frame.
    pub fn taa_active(&self) -> bool {
        self.post.antialiasing == Antialiasing::Taa && !self.vxgi.debug_voxel
    }
}
