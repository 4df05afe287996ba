//! Backend implementations of the host API
//!
//! Currently only the headless CPU backend, used by the test suite, tools and
//! the demo. Engine integrations implement `RenderHost` and `SceneHost` in
//! their own crates.

/// Headless software backend
pub mod headless;
