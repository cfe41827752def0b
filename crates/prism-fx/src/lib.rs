//! Compiled effect module intermediate representation
//!
//! The shader front-end compiles user-authored effect source into an
//! [`EffectModule`]: generated shading-language source plus a description of
//! everything the runtime has to materialize on the GPU (entry points,
//! uniform layout, sampler/texture bindings, technique and pass state).
//!
//! This crate is the input contract only. It does not parse or validate
//! effect syntax; it just describes what a compiled effect looks like.

use serde::{Deserialize, Serialize};

/// Shader pipeline stage an entry point runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// One compiled entry point in the generated source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Function name in the generated source
    pub name: String,
    /// Stage the entry point is compiled for
    pub stage: ShaderStage,
}

/// Logical pixel format of an effect-declared texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    R8,
    R16F,
    R32F,
    Rg8,
    Rg16,
    Rg16F,
    Rg32F,
    #[default]
    Rgba8,
    Rgba16,
    Rgba16F,
    Rgba32F,
    Rgb10A2,
}

/// Reference textures alias a live external surface instead of owning storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextureReference {
    /// Regular texture, the runtime owns the storage
    #[default]
    None,
    /// Aliases the presented color buffer
    BackBuffer,
    /// Aliases the tracked scene depth buffer
    DepthBuffer,
}

/// A 2-D texture declared by an effect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureDecl {
    /// Globally unique name, referenced by samplers and render targets
    pub unique_name: String,
    pub width: u32,
    pub height: u32,
    /// Mip level count, at least 1
    pub levels: u32,
    pub format: TextureFormat,
    #[serde(default)]
    pub reference: TextureReference,
}

impl Default for TextureDecl {
    fn default() -> Self {
        Self {
            unique_name: String::new(),
            width: 1,
            height: 1,
            levels: 1,
            format: TextureFormat::default(),
            reference: TextureReference::None,
        }
    }
}

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Point,
    #[default]
    Bilinear,
    Trilinear,
}

/// Texture coordinate address mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    #[default]
    Clamp,
    Wrap,
    Mirror,
    Border,
}

/// A sampler declaration binding a texture into a shader slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerDecl {
    /// Globally unique name of the sampler variable
    pub unique_name: String,
    /// Name of the texture this sampler reads
    pub texture_name: String,
    /// Sampler binding slot in the generated source
    pub binding: u32,
    /// Texture binding slot in the generated source
    pub texture_binding: u32,
    /// Sample through the gamma-corrected view of the texture
    #[serde(default)]
    pub srgb: bool,
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub address_u: AddressMode,
    #[serde(default)]
    pub address_v: AddressMode,
    #[serde(default)]
    pub address_w: AddressMode,
    #[serde(default)]
    pub lod_bias: f32,
    #[serde(default = "default_min_lod")]
    pub min_lod: f32,
    #[serde(default = "default_max_lod")]
    pub max_lod: f32,
}

fn default_min_lod() -> f32 {
    0.0
}
fn default_max_lod() -> f32 {
    1000.0
}

impl Default for SamplerDecl {
    fn default() -> Self {
        Self {
            unique_name: String::new(),
            texture_name: String::new(),
            binding: 0,
            texture_binding: 0,
            srgb: false,
            filter: FilterMode::default(),
            address_u: AddressMode::default(),
            address_v: AddressMode::default(),
            address_w: AddressMode::default(),
            lod_bias: 0.0,
            min_lod: default_min_lod(),
            max_lod: default_max_lod(),
        }
    }
}

/// Blend factor applied to source or destination color/alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    #[default]
    One,
    Zero,
    SrcColor,
    SrcAlpha,
    InvSrcColor,
    InvSrcAlpha,
    DstColor,
    DstAlpha,
    InvDstColor,
    InvDstAlpha,
}

/// Operation combining the blended source and destination terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

/// Stencil update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Invert,
    Replace,
    Incr,
    IncrSat,
    Decr,
    DecrSat,
}

/// Stencil comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompareFunc {
    #[default]
    Always,
    Never,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// Maximum number of simultaneous render targets a pass may name
pub const MAX_RENDER_TARGETS: usize = 8;

/// One draw step within a technique
///
/// An empty `render_target_names` list means "render to the main output".
/// Viewport dimensions of zero are replaced by the output size when the pass
/// targets the main output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassDesc {
    /// Named render targets, up to [`MAX_RENDER_TARGETS`]
    #[serde(default)]
    pub render_target_names: Vec<String>,
    pub vs_entry_point: String,
    pub ps_entry_point: String,

    #[serde(default)]
    pub blend_enable: bool,
    #[serde(default)]
    pub src_blend: BlendFactor,
    #[serde(default)]
    pub dest_blend: BlendFactor,
    #[serde(default)]
    pub blend_op: BlendOp,
    #[serde(default)]
    pub src_blend_alpha: BlendFactor,
    #[serde(default)]
    pub dest_blend_alpha: BlendFactor,
    #[serde(default)]
    pub blend_op_alpha: BlendOp,
    /// Color write mask replicated across all bound targets
    #[serde(default = "default_write_mask")]
    pub color_write_mask: u8,

    #[serde(default)]
    pub stencil_enable: bool,
    #[serde(default = "default_stencil_mask")]
    pub stencil_read_mask: u8,
    #[serde(default = "default_stencil_mask")]
    pub stencil_write_mask: u8,
    #[serde(default)]
    pub stencil_op_fail: StencilOp,
    #[serde(default)]
    pub stencil_op_depth_fail: StencilOp,
    #[serde(default)]
    pub stencil_op_pass: StencilOp,
    #[serde(default)]
    pub stencil_comparison: CompareFunc,
    #[serde(default)]
    pub stencil_reference: u32,

    /// Bind the gamma-corrected variant of each render target
    #[serde(default)]
    pub srgb_write: bool,
    /// Clear all bound render targets to transparent black before drawing
    #[serde(default)]
    pub clear_render_targets: bool,

    #[serde(default)]
    pub viewport_width: u32,
    #[serde(default)]
    pub viewport_height: u32,

    /// Vertex count for the index-free draw; geometry is generated in-shader
    #[serde(default = "default_num_vertices")]
    pub num_vertices: u32,
}

fn default_write_mask() -> u8 {
    0xF
}
fn default_stencil_mask() -> u8 {
    0xFF
}
fn default_num_vertices() -> u32 {
    3
}

impl Default for PassDesc {
    fn default() -> Self {
        Self {
            render_target_names: Vec::new(),
            vs_entry_point: String::new(),
            ps_entry_point: String::new(),
            blend_enable: false,
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            color_write_mask: default_write_mask(),
            stencil_enable: false,
            stencil_read_mask: default_stencil_mask(),
            stencil_write_mask: default_stencil_mask(),
            stencil_op_fail: StencilOp::Keep,
            stencil_op_depth_fail: StencilOp::Keep,
            stencil_op_pass: StencilOp::Keep,
            stencil_comparison: CompareFunc::Always,
            stencil_reference: 0,
            srgb_write: false,
            clear_render_targets: false,
            viewport_width: 0,
            viewport_height: 0,
            num_vertices: default_num_vertices(),
        }
    }
}

/// An ordered sequence of passes, independently toggle-able at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueDesc {
    pub name: String,
    pub passes: Vec<PassDesc>,
}

/// One compiled shader-effect unit as produced by the front-end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectModule {
    /// Generated target shading-language source for all entry points
    pub source: String,
    pub entry_points: Vec<EntryPoint>,
    /// Initial bytes of the uniform constant block; empty means no uniforms
    #[serde(default)]
    pub uniform_storage: Vec<u8>,
    #[serde(default)]
    pub samplers: Vec<SamplerDecl>,
    #[serde(default)]
    pub textures: Vec<TextureDecl>,
    #[serde(default)]
    pub techniques: Vec<TechniqueDesc>,
    /// Total sampler binding slots the generated source declares
    #[serde(default)]
    pub num_sampler_bindings: u32,
    /// Total texture binding slots the generated source declares
    #[serde(default)]
    pub num_texture_bindings: u32,
}

impl PassDesc {
    /// Whether this pass renders to the main output rather than named targets
    pub fn targets_main_output(&self) -> bool {
        self.render_target_names.is_empty()
    }
}
