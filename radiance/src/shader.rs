//! Holds the shader processing infrastructure for all shaders.

use std::collections::{HashMap, HashSet};

use handlebars::{Context, Handlebars, Helper, HelperDef, Output, RenderContext, RenderError};
use parking_lot::Mutex;
use rust_embed::RustEmbed;
use serde::Serialize;
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

use crate::{format_sso, util::error_scope::ErrorScope, PipelineError};

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/shaders"]
struct RadianceShaderSources;

/// Values substituted into every shader template.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct ShaderConfig {
    /// Length of each bindless texture array.
    pub bindless_capacity: u32,
    pub voxel_dimension: u32,
    pub cascade_count: u32,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            bindless_capacity: 256,
            voxel_dimension: 128,
            cascade_count: 4,
        }
    }
}

/// Registry of shader sources, rendered through handlebars before compilation.
///
/// Sources may pull in other sources with `{{include "prefix/file.wgsl"}}`.
/// Every file is included at most once per rendered shader.
pub struct ShaderPreProcessor {
    files: HashMap<String, String>,
}

impl ShaderPreProcessor {
    pub fn new() -> Self {
        let mut v = Self { files: HashMap::new() };
        v.add_shaders_embed::<RadianceShaderSources>("radiance");
        v
    }

    pub fn add_shaders_embed<T: RustEmbed>(&mut self, prefix: &str) {
        for file in T::iter() {
            let Some(embedded) = T::get(&file) else {
                continue;
            };
            match String::from_utf8(embedded.data.into_owned()) {
                Ok(contents) => {
                    self.files.insert(format!("{prefix}/{file}"), contents);
                }
                Err(e) => log::warn!("Skipping shader {prefix}/{file}, it is not valid utf-8: {e}"),
            }
        }
    }

    pub fn add_shader(&mut self, name: &str, contents: &str) {
        self.files.insert(name.to_owned(), contents.to_owned());
    }

    pub fn files(&self) -> std::collections::hash_map::Keys<'_, String, String> {
        self.files.keys()
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.files.get(name)
    }

    pub fn render_shader<T>(&self, base: &str, config: &T) -> Result<String, RenderError>
    where
        T: Serialize,
    {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("include", Box::new(ShaderIncluder::new(base, &self.files)));

        let contents = self.files.get(base).ok_or_else(|| {
            RenderError::new(format!(
                "Base shader {base} is not registered. All registered shaders: {}",
                registered_shader_string(&self.files)
            ))
        })?;

        registry.render_template(contents, config)
    }

    /// Renders `name` and compiles it. Compile errors are returned, warnings only logged by wgpu.
    pub fn create_shader_module<T>(&self, device: &Device, name: &str, config: &T) -> Result<ShaderModule, PipelineError>
    where
        T: Serialize,
    {
        profiling::scope!("ShaderPreProcessor::create_shader_module");

        let source = self
            .render_shader(name, config)
            .map_err(|e| PipelineError::ShaderPreprocess {
                name: name.into(),
                reason: e.to_string(),
            })?;

        let scope = ErrorScope::new(device);
        let label = format_sso!("{name} shader");
        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(&label),
            source: ShaderSource::Wgsl(source.into()),
        });
        scope.end().map_err(|e| PipelineError::ShaderCompile {
            name: name.into(),
            reason: e.to_string(),
        })?;

        log::debug!("Compiled shader {name}");
        Ok(module)
    }
}

impl Default for ShaderPreProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn registered_shader_string(files: &HashMap<String, String>) -> String {
    let mut v: Vec<_> = files.keys().cloned().collect();
    v.sort_unstable();
    v.join(", ")
}

struct ShaderIncluder<'a> {
    files: &'a HashMap<String, String>,
    include_state: Mutex<HashSet<String>>,
}
impl<'a> ShaderIncluder<'a> {
    fn new(base: &str, files: &'a HashMap<String, String>) -> Self {
        Self {
            files,
            include_state: Mutex::new({
                let mut set = HashSet::new();
                set.insert(base.to_owned());
                set
            }),
        }
    }
}
impl<'a> HelperDef for ShaderIncluder<'a> {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'reg, 'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> handlebars::HelperResult {
        let file_name_value = h
            .param(0)
            .ok_or_else(|| RenderError::new("include helper must have a single argument for the include path"))?
            .value();
        let file_name = match file_name_value {
            handlebars::JsonValue::String(s) => s,
            _ => return Err(RenderError::new("include helper's first argument must be a string")),
        };

        {
            let mut include_status = self.include_state.lock();
            if !include_status.insert(file_name.clone()) {
                return Ok(());
            }
        }

        let contents = self.files.get(file_name).ok_or_else(|| {
            RenderError::new(format!(
                "Included file \"{file_name}\" is not registered. All registered files: {}",
                registered_shader_string(self.files)
            ))
        })?;

        out.write(&r.render_template(contents, ctx.data())?)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{ShaderConfig, ShaderPreProcessor};

    #[test]
    fn simple_include() {
        let mut pp = ShaderPreProcessor::new();
        pp.add_shader("simple", "{{include \"other\"}} simple");
        pp.add_shader("other", "other");
        let output = pp.render_shader("simple", &ShaderConfig::default()).unwrap();

        assert_eq!(output, "other simple");
    }

    #[test]
    fn recursive_include() {
        let mut pp = ShaderPreProcessor::new();
        pp.add_shader("simple", "{{include \"other\"}} simple");
        pp.add_shader("other", "{{include \"simple\"}} other");
        let output = pp.render_shader("simple", &ShaderConfig::default()).unwrap();

        assert_eq!(output, " other simple");
    }

    #[test]
    fn error_include() {
        let mut pp = ShaderPreProcessor::new();
        pp.add_shader("simple", "{{include \"other\"}} simple");
        let output = pp.render_shader("simple", &ShaderConfig::default());

        assert!(output.is_err(), "Expected error, got {output:?}");
    }

    #[test]
    fn no_arg_include() {
        let mut pp = ShaderPreProcessor::new();
        pp.add_shader("simple", "{{include}} simple");
        let output = pp.render_shader("simple", &ShaderConfig::default());

        assert!(output.is_err(), "Expected error, got {output:?}");
    }

    #[test]
    fn config_values_substitute() {
        let mut pp = ShaderPreProcessor::new();
        pp.add_shader("arrays", "array<u32, {{bindless_capacity}}>; {{cascade_count}}");
        let config = ShaderConfig {
            bindless_capacity: 64,
            ..Default::default()
        };
        let output = pp.render_shader("arrays", &config).unwrap();

        assert_eq!(output, "array<u32, 64>; 4");
    }

    #[test]
    fn unknown_config_value_is_an_error() {
        let mut pp = ShaderPreProcessor::new();
        pp.add_shader("missing", "{{not_a_field}}");
        assert!(pp.render_shader("missing", &ShaderConfig::default()).is_err());
    }

    #[test]
    fn builtin_shaders_are_registered() {
        let pp = ShaderPreProcessor::new();
        assert!(pp.get("radiance/mipmap.wgsl").is_some());
        assert!(pp.get("radiance/blit.wgsl").is_some());
    }
}
