//! Pieces shared by every pass.

mod camera;
mod constants;
mod interfaces;
mod samplers;
mod vertex;

pub use camera::*;
pub use constants::*;
pub use interfaces::*;
pub use samplers::*;
pub use vertex::*;
