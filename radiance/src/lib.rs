//! Core of the radiance deferred renderer.
//!
//! Owns the GPU resource lifecycle: device selection, fence synchronized
//! command submission, fixed capacity descriptor heaps with a bindless
//! resource table, textures whose views survive resizes, the ring of
//! per-frame resources, and the pipeline registry. The render passes and the
//! per-frame orchestration live in `radiance-routine`.
//!
//! Everything here is driven from a single recording thread. The only places
//! the CPU blocks on the GPU are [`FrameRing::begin_frame`] and
//! [`CommandQueue::flush`].

mod clock;
mod config;
mod descriptor;
mod error;
mod event;
mod frame;
mod pipeline;
mod queue;
mod resource_table;
mod setup;
mod shader;
mod state;
mod surface;
mod texture;
pub mod util;

pub use clock::*;
pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use event::*;
pub use frame::*;
pub use pipeline::*;
pub use queue::*;
pub use resource_table::*;
pub use setup::*;
pub use shader::*;
pub use state::*;
pub use surface::*;
pub use texture::*;

/// Reexport of radiance-types with glam.
pub use radiance_types as types;
