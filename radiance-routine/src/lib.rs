//! Render passes and per-frame orchestration of the radiance deferred renderer.
//!
//! Every pass records into the frame's single command list on the universal
//! pipeline layout: group 0 holds the frame constants of the current ring
//! slot, group 1 the bindless resource table, group 2 the samplers and group 3
//! whatever the pass binds explicitly. Draws select textures by pushing their
//! table indices as push constants.

pub mod common;
mod error;
pub mod gbuffer;
pub mod ibl;
pub mod lighting;
pub mod plan;
pub mod post;
pub mod renderer;
pub mod scene;
pub mod shaders;
pub mod shadow;
pub mod skybox;
pub mod ssao;
pub mod taa;
pub mod uniforms;
pub mod vxgi;

pub use error::*;
pub use renderer::{Renderer, RendererNewArgs};
