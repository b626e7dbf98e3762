//! Holds the sources of all routine shaders.

use radiance::ShaderPreProcessor;
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/shaders/src"]
pub struct RoutineShaderSources;

/// Prefix routine shaders are registered under.
pub const SHADER_PREFIX: &str = "radiance-routine";

/// A preprocessor holding the core shaders and every routine shader.
pub fn preprocessor() -> ShaderPreProcessor {
    let mut spp = ShaderPreProcessor::new();
    spp.add_shaders_embed::<RoutineShaderSources>(SHADER_PREFIX);
    spp
}

/// Shaders that are only ever included, never compiled on their own.
pub const INCLUDE_ONLY: &[&str] = &[
    "radiance-routine/common.wgsl",
    "radiance-routine/vertex.wgsl",
    "radiance-routine/brdf.wgsl",
    "radiance-routine/cube_common.wgsl",
    "radiance-routine/shadow_sampling.wgsl",
    "radiance-routine/voxel_tracing.wgsl",
    "radiance/fullscreen.wgsl",
];

#[cfg(test)]
mod tests {
    use radiance::ShaderConfig;

    use super::*;

    fn validate(name: &str, source: &str) {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(e) => panic!("{name} failed to parse:\n{}", e.emit_to_string(source)),
        };
        let mut validator =
            naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
        if let Err(e) = validator.validate(&module) {
            panic!("{name} failed to validate:\n{}", e.emit_to_string(source));
        }
    }

    #[test]
    fn every_shader_validates() {
        let spp = preprocessor();
        let config = ShaderConfig::default();

        let mut names: Vec<_> = spp
            .files()
            .filter(|name| !INCLUDE_ONLY.contains(&name.as_str()))
            .cloned()
            .collect();
        names.sort_unstable();
        assert!(names.iter().any(|name| name == "radiance-routine/lighting.wgsl"));

        for name in names {
            let source = spp.render_shader(&name, &config).unwrap();
            validate(&name, &source);
        }
    }

    #[test]
    fn config_reaches_includes() {
        let spp = preprocessor();
        let config = ShaderConfig {
            bindless_capacity: 32,
            cascade_count: 4,
            ..Default::default()
        };
        let source = spp.render_shader("radiance-routine/lighting.wgsl", &config).unwrap();
        assert!(source.contains("binding_array<texture_2d<f32>, 32>"));
        assert!(source.contains("array<mat4x4<f32>, 4>"));
        assert_eq!(source.matches("struct PassConstants").count(), 1);
    }
}
