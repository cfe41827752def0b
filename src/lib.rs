//! Prism - per-frame shader post-processing runtime
//!
//! Hosts compiled effect modules against a live swapchain: each present,
//! every enabled technique runs its pass sequence over the current frame
//! contents before the frame reaches the screen.
//!
//! The engine is written against the [`GpuDevice`] trait; the crate ships a
//! wgpu adapter in [`backend`] and a call-recording [`mock::MockDevice`] for
//! tests. Effect modules come in as [`prism_fx::EffectModule`] intermediate
//! representation and are compiled per device feature level.
//!
//! Companion crates:
//! - `prism-fx` - effect module intermediate representation
//! - `prism-config` - configuration files and effect directory watching

pub mod backend;
pub mod capture;
pub mod compiler;
pub mod depth;
pub mod device;
pub mod effect;
pub mod formats;
pub mod mock;
pub mod runtime;
pub mod state_cache;
pub mod technique;
pub mod textures;

pub use backend::WgpuDevice;
pub use capture::convert_to_rgba8;
pub use compiler::{CompileOutput, CompiledShader, CompilerCell, ShaderCompiler, ShaderProfile};
pub use depth::{DepthStats, DepthTracker};
pub use device::{DeviceError, GpuDevice, NativeFormat, TextureId};
pub use effect::Effect;
pub use mock::MockDevice;
pub use runtime::{FrameStats, OutputDesc, Runtime};
pub use technique::{MovingAverage, Technique};
