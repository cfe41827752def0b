//! Concrete device adapters
//!
//! One adapter per graphics API backend, each implementing
//! [`crate::device::GpuDevice`]. Only a wgpu adapter exists today.

pub mod wgpu;

pub use wgpu::WgpuDevice;
