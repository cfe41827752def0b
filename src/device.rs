//! GPU device abstraction
//!
//! The engine is written entirely against [`GpuDevice`]: a handle-based
//! interface covering resource creation, state binding, draws, copies,
//! timestamp queries and readback. One concrete adapter exists per graphics
//! API backend (see [`crate::backend`]); tests use [`crate::mock::MockDevice`].
//!
//! Every creation call returns a `Result` with enough context for diagnosis.
//! Destruction is explicit and must be paired with every creation path,
//! including partial-failure paths.

use crate::compiler::CompiledShader;
use thiserror::Error;

/// Opaque handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Opaque handle to a texture view (shader-resource, render-target or
/// depth-stencil interpretation of a texture)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub u64);

/// Opaque handle to an immutable sampler state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerId(pub u64);

/// Opaque handle to an immutable blend state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateId(pub u64);

/// Opaque handle to an immutable depth-stencil state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilStateId(pub u64);

/// Opaque handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u64);

/// Opaque handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Opaque handle to a GPU query object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub u64);

/// Concrete texture format as understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeFormat {
    R8Unorm,
    R16Float,
    R32Float,
    Rg8Unorm,
    Rg16Unorm,
    Rg16Float,
    Rg32Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgb10a2Unorm,
    D24UnormS8Uint,
}

/// Device feature level, used to pick a shader target profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureLevel {
    /// Reduced feature set (older hardware / compatibility adapters)
    Compat,
    /// Baseline feature set
    Core,
    /// Full feature set
    Extended,
}

/// Backend binding-slot limits validated during effect compilation
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub max_sampler_slots: u32,
    pub max_texture_slots: u32,
    pub max_render_targets: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_sampler_slots: 16,
            max_texture_slots: 128,
            max_render_targets: 8,
        }
    }
}

/// Descriptor for a 2-D texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: NativeFormat,
    pub render_target: bool,
    pub shader_resource: bool,
    pub depth_stencil: bool,
    /// Mip chains for this texture can be regenerated on the GPU
    pub generate_mips: bool,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            width: 1,
            height: 1,
            mip_levels: 1,
            sample_count: 1,
            format: NativeFormat::Rgba8Unorm,
            render_target: false,
            shader_resource: false,
            depth_stencil: false,
            generate_mips: false,
        }
    }
}

/// How a view interprets its texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    ShaderResource,
    RenderTarget,
    DepthStencil,
}

/// Descriptor for a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDesc {
    pub kind: ViewKind,
    /// View format; may reinterpret the storage (normal vs sRGB)
    pub format: NativeFormat,
    pub mip_levels: u32,
}

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Point,
    #[default]
    Bilinear,
    Trilinear,
}

/// Texture coordinate address mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Clamp,
    Wrap,
    Mirror,
    Border,
}

/// Immutable sampler state descriptor
///
/// Equality and hashing go through the float bit patterns so that
/// structurally identical descriptors always cache to the same object.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: FilterMode::Bilinear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: 1000.0,
        }
    }
}

impl PartialEq for SamplerDesc {
    fn eq(&self, other: &Self) -> bool {
        self.filter == other.filter
            && self.address_u == other.address_u
            && self.address_v == other.address_v
            && self.address_w == other.address_w
            && self.lod_bias.to_bits() == other.lod_bias.to_bits()
            && self.min_lod.to_bits() == other.min_lod.to_bits()
            && self.max_lod.to_bits() == other.max_lod.to_bits()
    }
}

impl Eq for SamplerDesc {}

impl std::hash::Hash for SamplerDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.filter.hash(state);
        self.address_u.hash(state);
        self.address_v.hash(state);
        self.address_w.hash(state);
        self.lod_bias.to_bits().hash(state);
        self.min_lod.to_bits().hash(state);
        self.max_lod.to_bits().hash(state);
    }
}

/// Blend factor applied to source or destination terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
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

/// Blend equation operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

/// Immutable blend state descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub enable: bool,
    pub src_blend: BlendFactor,
    pub dest_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_blend_alpha: BlendFactor,
    pub dest_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOp,
    /// Write mask replicated across all simultaneous render targets
    pub write_mask: u8,
}

impl Default for BlendDesc {
    fn default() -> Self {
        Self {
            enable: false,
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            write_mask: 0xF,
        }
    }
}

/// Stencil update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
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

/// Comparison function for stencil tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
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

/// Immutable depth-stencil state descriptor
///
/// Depth testing is always disabled for effect passes; only the stencil
/// portion varies per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_op_fail: StencilOp,
    pub stencil_op_depth_fail: StencilOp,
    pub stencil_op_pass: StencilOp,
    pub stencil_comparison: CompareFunc,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_op_fail: StencilOp::Keep,
            stencil_op_depth_fail: StencilOp::Keep,
            stencil_op_pass: StencilOp::Keep,
            stencil_comparison: CompareFunc::Always,
        }
    }
}

/// Result of a disjoint (timer validity) query
#[derive(Debug, Clone, Copy)]
pub struct DisjointResult {
    /// The timestamp pair straddled a clock discontinuity and must be discarded
    pub disjoint: bool,
    /// Timestamp ticks per second
    pub frequency: u64,
}

/// CPU-side copy of a texture produced by [`GpuDevice::read_texture`]
#[derive(Debug, Clone)]
pub struct TextureData {
    pub data: Vec<u8>,
    pub row_pitch: usize,
}

/// Errors surfaced by device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create texture '{name}' ({width}x{height}, {levels} levels, {format:?})")]
    TextureCreation {
        name: String,
        width: u32,
        height: u32,
        levels: u32,
        format: NativeFormat,
    },
    #[error("failed to create {kind:?} view for texture '{name}' ({format:?})")]
    ViewCreation {
        name: String,
        kind: ViewKind,
        format: NativeFormat,
    },
    #[error("failed to create sampler state ({desc:?})")]
    SamplerCreation { desc: SamplerDesc },
    #[error("failed to create state object: {0}")]
    StateCreation(String),
    #[error("failed to create shader '{0}': {1}")]
    ShaderCreation(String, String),
    #[error("failed to create buffer '{0}' ({1} bytes)")]
    BufferCreation(String, usize),
    #[error("failed to create query")]
    QueryCreation,
    #[error("format {0:?} is not representable on this backend")]
    UnsupportedFormat(NativeFormat),
    #[error("texture readback failed: {0}")]
    Readback(String),
}

/// Backend device/context interface the engine is written against
///
/// All methods execute on the thread that owns the graphics context; the GPU
/// command stream is the serialization point and no internal locking exists.
pub trait GpuDevice {
    fn feature_level(&self) -> FeatureLevel;
    fn limits(&self) -> DeviceLimits;

    // Resource creation and destruction
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;
    fn destroy_texture(&mut self, id: TextureId);
    /// Descriptor of an existing texture, if the handle is live
    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc>;

    fn create_view(&mut self, texture: TextureId, desc: &ViewDesc) -> Result<ViewId, DeviceError>;
    fn destroy_view(&mut self, id: ViewId);
    /// Texture a live view reads or writes
    fn view_texture(&self, id: ViewId) -> Option<TextureId>;
    /// Descriptor of an existing view, if the handle is live
    fn view_desc(&self, id: ViewId) -> Option<ViewDesc>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError>;
    fn destroy_sampler(&mut self, id: SamplerId);

    fn create_blend_state(&mut self, desc: &BlendDesc) -> Result<BlendStateId, DeviceError>;
    fn destroy_blend_state(&mut self, id: BlendStateId);

    fn create_depth_stencil_state(
        &mut self,
        desc: &DepthStencilDesc,
    ) -> Result<DepthStencilStateId, DeviceError>;
    fn destroy_depth_stencil_state(&mut self, id: DepthStencilStateId);

    fn create_shader(&mut self, shader: &CompiledShader) -> Result<ShaderId, DeviceError>;
    fn destroy_shader(&mut self, id: ShaderId);

    fn create_constant_buffer(&mut self, label: &str, data: &[u8])
    -> Result<BufferId, DeviceError>;
    /// Map-discard style CPU write into a constant buffer
    fn update_constant_buffer(&mut self, id: BufferId, data: &[u8]);
    fn destroy_buffer(&mut self, id: BufferId);

    // Data transfer
    fn upload_texture(&mut self, id: TextureId, data: &[u8], row_pitch: u32);
    fn generate_mips(&mut self, view: ViewId);
    fn copy_texture(&mut self, src: TextureId, dst: TextureId);
    /// Multisample resolve from `src` into single-sampled `dst`
    fn resolve_texture(&mut self, src: TextureId, dst: TextureId, format: NativeFormat);
    /// Synchronously stage the texture into CPU-readable memory
    fn read_texture(&mut self, id: TextureId) -> Result<TextureData, DeviceError>;

    // State binding and draws
    fn set_shaders(&mut self, vs: Option<ShaderId>, ps: Option<ShaderId>);
    fn set_blend_state(&mut self, state: Option<BlendStateId>);
    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>, stencil_ref: u32);
    fn set_samplers(&mut self, samplers: &[Option<SamplerId>]);
    fn set_shader_resources(&mut self, views: &[Option<ViewId>]);
    fn set_render_targets(&mut self, targets: &[Option<ViewId>], depth_stencil: Option<ViewId>);
    fn set_viewport(&mut self, width: u32, height: u32);
    fn set_constant_buffer(&mut self, buffer: Option<BufferId>);
    fn clear_render_target(&mut self, view: ViewId, color: [f32; 4]);
    /// Clear only the stencil plane of a depth-stencil view
    fn clear_stencil(&mut self, view: ViewId, value: u8);
    /// Index-free draw; vertices are generated in-shader from the vertex index
    fn draw(&mut self, vertex_count: u32);

    // Timestamp queries; polls are non-blocking and never flush the pipeline
    fn create_timestamp_query(&mut self) -> Result<QueryId, DeviceError>;
    fn create_disjoint_query(&mut self) -> Result<QueryId, DeviceError>;
    fn destroy_query(&mut self, id: QueryId);
    fn begin_disjoint_query(&mut self, id: QueryId);
    fn end_disjoint_query(&mut self, id: QueryId);
    /// Record a timestamp into the query at the current command stream position
    fn write_timestamp(&mut self, id: QueryId);
    fn poll_timestamp(&mut self, id: QueryId) -> Option<u64>;
    fn poll_disjoint(&mut self, id: QueryId) -> Option<DisjointResult>;

    // Host application state
    /// Capture the host's current pipeline state for later restoration
    fn capture_state(&mut self);
    /// Restore the pipeline state captured by the matching `capture_state`
    fn restore_state(&mut self);
}
