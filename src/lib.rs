//! Hybrid order-independent transparency for OpenGL 4.3 via [glow].
//!
//! This crate provides [`HybridAlgorithm`], which renders a scene of opaque
//! and translucent geometry without sorting it. Per pixel, the `k = 4`
//! nearest translucent fragments are blended exactly; everything behind them
//! is approximated by an alpha-weighted average. The caller supplies the
//! geometry through a draw callback that runs once per rasterization pass.
//!
//! # Features
//!
//! - **Exact core**: the nearest fragments are captured into a per-pixel
//!   depth k-table with atomics and weighted by per-slot transmittance.
//! - **Bounded memory**: storage grows with the resolution, not with the
//!   scene's depth complexity.
//! - **Hot shader reload** from a directory ([`ShaderSource::Directory`]);
//!   programs relink lazily when one of their stages changes.
//! - **CPU reference** of every kernel in [`kernel`], used to pin down the
//!   numeric behavior of the GLSL.
//!
//! # Backends
//!
//! The pipeline talks to the GPU through the [`Device`](device::Device)
//! trait. With the `glow` feature (on by default) [`GlowDevice`] implements
//! it over a [`glow::Context`].
//!
//! # Safety
//!
//! Creating a [`GlowDevice`] is `unsafe`: its context must be current, and
//! stay current for as long as the device and every object built on it are
//! used.
//!
//! [glow]: https://docs.rs/glow

mod camera;
pub mod device;
pub mod error;
#[cfg(feature = "glow")]
mod gl;
mod hybrid;
pub mod kernel;
mod notify;
mod program;
#[cfg(test)]
mod recording;
mod resources;
mod shader;
pub mod shaders;

pub use camera::{Camera, PerspectiveCamera};
pub use error::{Error, Result};
#[cfg(feature = "glow")]
pub use gl::{setup_debug_output, GlowDevice};
pub use hybrid::{
    workgroup_count, HybridAlgorithm, HybridConfig, HybridPrograms, ShaderSource,
    ACCUMULATION_TEXTURE_UNIT, CORE_TEXTURE_UNIT, DEPTH_COMPLEXITY_BINDING, DEPTH_KTAB_BINDING,
    OPAQUE_TEXTURE_UNIT, VISIBILITY_KTAB_BINDING, VISIBILITY_WORKGROUP_SIZE,
};
pub use notify::{ChangeListener, Listeners};
pub use program::Program;
pub use resources::{pixel_count, FrameResources};
pub use shader::{read_source, NamedStrings, Shader};
