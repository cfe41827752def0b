//! Resource translation
//!
//! Pure mapping from the effect module's logical descriptors to the concrete
//! descriptors the device consumes: pixel formats, blend and stencil enums,
//! sampler parameters. No state; the only failure mode is "format not
//! representable", which surfaces as an error naming the offending resource.

use crate::device::{self, NativeFormat};
use prism_fx as fx;

/// Storage format for a logical texture format
///
/// The 8-bit RGBA format gets a linear storage format; its gamma-corrected
/// interpretation is expressed through views (see [`srgb_format`]).
pub fn storage_format(format: fx::TextureFormat) -> NativeFormat {
    match format {
        fx::TextureFormat::R8 => NativeFormat::R8Unorm,
        fx::TextureFormat::R16F => NativeFormat::R16Float,
        fx::TextureFormat::R32F => NativeFormat::R32Float,
        fx::TextureFormat::Rg8 => NativeFormat::Rg8Unorm,
        fx::TextureFormat::Rg16 => NativeFormat::Rg16Unorm,
        fx::TextureFormat::Rg16F => NativeFormat::Rg16Float,
        fx::TextureFormat::Rg32F => NativeFormat::Rg32Float,
        fx::TextureFormat::Rgba8 => NativeFormat::Rgba8Unorm,
        fx::TextureFormat::Rgba16 => NativeFormat::Rgba16Unorm,
        fx::TextureFormat::Rgba16F => NativeFormat::Rgba16Float,
        fx::TextureFormat::Rgba32F => NativeFormat::Rgba32Float,
        fx::TextureFormat::Rgb10A2 => NativeFormat::Rgb10a2Unorm,
    }
}

/// Linear (non-gamma) variant of a format; identity for formats without one
pub fn normal_format(format: NativeFormat) -> NativeFormat {
    match format {
        NativeFormat::Rgba8UnormSrgb => NativeFormat::Rgba8Unorm,
        NativeFormat::Bgra8UnormSrgb => NativeFormat::Bgra8Unorm,
        other => other,
    }
}

/// Gamma-corrected variant of a format; identity for formats without one
pub fn srgb_format(format: NativeFormat) -> NativeFormat {
    match format {
        NativeFormat::Rgba8Unorm => NativeFormat::Rgba8UnormSrgb,
        NativeFormat::Bgra8Unorm => NativeFormat::Bgra8UnormSrgb,
        other => other,
    }
}

/// Whether a format has a distinct gamma-corrected representation
pub fn has_distinct_srgb(format: NativeFormat) -> bool {
    srgb_format(format) != normal_format(format)
}

/// Color channel bit depth used by the screenshot conversion
pub fn color_bit_depth(format: NativeFormat) -> u32 {
    match format {
        NativeFormat::Rgb10a2Unorm => 10,
        _ => 8,
    }
}

/// Whether a format stores channels in blue-green-red-alpha order
pub fn is_bgra(format: NativeFormat) -> bool {
    matches!(
        format,
        NativeFormat::Bgra8Unorm | NativeFormat::Bgra8UnormSrgb
    )
}

/// Bytes per pixel of a logical format's storage
pub fn bytes_per_pixel(format: fx::TextureFormat) -> u32 {
    match format {
        fx::TextureFormat::R8 => 1,
        fx::TextureFormat::R16F | fx::TextureFormat::Rg8 => 2,
        fx::TextureFormat::R32F
        | fx::TextureFormat::Rg16
        | fx::TextureFormat::Rg16F
        | fx::TextureFormat::Rgba8
        | fx::TextureFormat::Rgb10A2 => 4,
        fx::TextureFormat::Rg32F | fx::TextureFormat::Rgba16 | fx::TextureFormat::Rgba16F => 8,
        fx::TextureFormat::Rgba32F => 16,
    }
}

pub fn blend_factor(value: fx::BlendFactor) -> device::BlendFactor {
    match value {
        fx::BlendFactor::One => device::BlendFactor::One,
        fx::BlendFactor::Zero => device::BlendFactor::Zero,
        fx::BlendFactor::SrcColor => device::BlendFactor::SrcColor,
        fx::BlendFactor::SrcAlpha => device::BlendFactor::SrcAlpha,
        fx::BlendFactor::InvSrcColor => device::BlendFactor::InvSrcColor,
        fx::BlendFactor::InvSrcAlpha => device::BlendFactor::InvSrcAlpha,
        fx::BlendFactor::DstColor => device::BlendFactor::DstColor,
        fx::BlendFactor::DstAlpha => device::BlendFactor::DstAlpha,
        fx::BlendFactor::InvDstColor => device::BlendFactor::InvDstColor,
        fx::BlendFactor::InvDstAlpha => device::BlendFactor::InvDstAlpha,
    }
}

pub fn blend_op(value: fx::BlendOp) -> device::BlendOp {
    match value {
        fx::BlendOp::Add => device::BlendOp::Add,
        fx::BlendOp::Subtract => device::BlendOp::Subtract,
        fx::BlendOp::RevSubtract => device::BlendOp::RevSubtract,
        fx::BlendOp::Min => device::BlendOp::Min,
        fx::BlendOp::Max => device::BlendOp::Max,
    }
}

pub fn stencil_op(value: fx::StencilOp) -> device::StencilOp {
    match value {
        fx::StencilOp::Keep => device::StencilOp::Keep,
        fx::StencilOp::Zero => device::StencilOp::Zero,
        fx::StencilOp::Invert => device::StencilOp::Invert,
        fx::StencilOp::Replace => device::StencilOp::Replace,
        fx::StencilOp::Incr => device::StencilOp::Incr,
        fx::StencilOp::IncrSat => device::StencilOp::IncrSat,
        fx::StencilOp::Decr => device::StencilOp::Decr,
        fx::StencilOp::DecrSat => device::StencilOp::DecrSat,
    }
}

pub fn compare_func(value: fx::CompareFunc) -> device::CompareFunc {
    match value {
        fx::CompareFunc::Always => device::CompareFunc::Always,
        fx::CompareFunc::Never => device::CompareFunc::Never,
        fx::CompareFunc::Equal => device::CompareFunc::Equal,
        fx::CompareFunc::NotEqual => device::CompareFunc::NotEqual,
        fx::CompareFunc::Less => device::CompareFunc::Less,
        fx::CompareFunc::LessEqual => device::CompareFunc::LessEqual,
        fx::CompareFunc::Greater => device::CompareFunc::Greater,
        fx::CompareFunc::GreaterEqual => device::CompareFunc::GreaterEqual,
    }
}

pub fn filter_mode(value: fx::FilterMode) -> device::FilterMode {
    match value {
        fx::FilterMode::Point => device::FilterMode::Point,
        fx::FilterMode::Bilinear => device::FilterMode::Bilinear,
        fx::FilterMode::Trilinear => device::FilterMode::Trilinear,
    }
}

pub fn address_mode(value: fx::AddressMode) -> device::AddressMode {
    match value {
        fx::AddressMode::Clamp => device::AddressMode::Clamp,
        fx::AddressMode::Wrap => device::AddressMode::Wrap,
        fx::AddressMode::Mirror => device::AddressMode::Mirror,
        fx::AddressMode::Border => device::AddressMode::Border,
    }
}

/// Full sampler descriptor for a sampler declaration
pub fn sampler_desc(decl: &fx::SamplerDecl) -> device::SamplerDesc {
    device::SamplerDesc {
        filter: filter_mode(decl.filter),
        address_u: address_mode(decl.address_u),
        address_v: address_mode(decl.address_v),
        address_w: address_mode(decl.address_w),
        lod_bias: decl.lod_bias,
        min_lod: decl.min_lod,
        max_lod: decl.max_lod,
    }
}

/// Full blend descriptor for a pass
pub fn blend_desc(pass: &fx::PassDesc) -> device::BlendDesc {
    device::BlendDesc {
        enable: pass.blend_enable,
        src_blend: blend_factor(pass.src_blend),
        dest_blend: blend_factor(pass.dest_blend),
        blend_op: blend_op(pass.blend_op),
        src_blend_alpha: blend_factor(pass.src_blend_alpha),
        dest_blend_alpha: blend_factor(pass.dest_blend_alpha),
        blend_op_alpha: blend_op(pass.blend_op_alpha),
        write_mask: pass.color_write_mask,
    }
}

/// Full depth-stencil descriptor for a pass
pub fn depth_stencil_desc(pass: &fx::PassDesc) -> device::DepthStencilDesc {
    device::DepthStencilDesc {
        stencil_enable: pass.stencil_enable,
        stencil_read_mask: pass.stencil_read_mask,
        stencil_write_mask: pass.stencil_write_mask,
        stencil_op_fail: stencil_op(pass.stencil_op_fail),
        stencil_op_depth_fail: stencil_op(pass.stencil_op_depth_fail),
        stencil_op_pass: stencil_op(pass.stencil_op_pass),
        stencil_comparison: compare_func(pass.stencil_comparison),
    }
}
