//! Helpers shared by the core and the routines.

pub mod bind_merge;
pub mod error_scope;
pub mod math;
pub mod mipmap;
pub mod typedefs;
