//! Rendering systems
//!
//! Higher-level systems built on the host API.

pub mod lightmap;
