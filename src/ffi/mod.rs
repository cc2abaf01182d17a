//! FFI (Foreign Function Interface) layer for C bindings.
//!
//! Every function takes a manager handle created by
//! `streamrs_manager_create` and returns a [`StreamStatus`]. The C header is
//! generated into `include/streamrs.h` at build time.

pub mod manager;
pub mod types;

pub use manager::*;
pub use types::*;
