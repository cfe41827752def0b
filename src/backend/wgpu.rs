//! wgpu device adapter
//!
//! Implements [`GpuDevice`] over a wgpu device/queue pair. The engine issues
//! immediate-mode style bind and draw calls; the adapter accumulates the
//! bound state and materializes one render pass per draw, with render
//! pipelines cached by their full state key.
//!
//! Bind slots follow a fixed group convention shared with the generated
//! shader source: group 0 holds the uniform block, group 1 the texture
//! views by binding slot, group 2 the samplers. Vacant slots a shader
//! declares are filled with a dummy texture/sampler so bind groups always
//! validate.

use crate::compiler::CompiledShader;
use crate::device::{
    self, BlendDesc, BlendStateId, BufferId, DepthStencilDesc, DepthStencilStateId, DeviceError,
    DeviceLimits, DisjointResult, FeatureLevel, GpuDevice, NativeFormat, QueryId, SamplerDesc,
    SamplerId, ShaderId, TextureData, TextureDesc, TextureId, ViewDesc, ViewId, ViewKind,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

const BLIT_SHADER: &str = r#"
struct BlitOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var blit_source: texture_2d<f32>;
@group(0) @binding(1) var blit_sampler: sampler;

@vertex
fn vs_blit(@builtin(vertex_index) index: u32) -> BlitOutput {
    var out: BlitOutput;
    out.uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    out.position = vec4<f32>(out.uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    return out;
}

@fragment
fn ps_blit(in: BlitOutput) -> @location(0) vec4<f32> {
    return textureSample(blit_source, blit_sampler, in.uv);
}
"#;

pub fn texture_format(format: NativeFormat) -> wgpu::TextureFormat {
    match format {
        NativeFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        NativeFormat::R16Float => wgpu::TextureFormat::R16Float,
        NativeFormat::R32Float => wgpu::TextureFormat::R32Float,
        NativeFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        NativeFormat::Rg16Unorm => wgpu::TextureFormat::Rg16Unorm,
        NativeFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        NativeFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        NativeFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        NativeFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        NativeFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        NativeFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        NativeFormat::Rgba16Unorm => wgpu::TextureFormat::Rgba16Unorm,
        NativeFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        NativeFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        NativeFormat::Rgb10a2Unorm => wgpu::TextureFormat::Rgb10a2Unorm,
        NativeFormat::D24UnormS8Uint => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn bytes_per_pixel(format: NativeFormat) -> u32 {
    match format {
        NativeFormat::R8Unorm => 1,
        NativeFormat::R16Float | NativeFormat::Rg8Unorm => 2,
        NativeFormat::Rg32Float | NativeFormat::Rgba16Unorm | NativeFormat::Rgba16Float => 8,
        NativeFormat::Rgba32Float => 16,
        _ => 4,
    }
}

fn blend_factor(factor: device::BlendFactor) -> wgpu::BlendFactor {
    match factor {
        device::BlendFactor::One => wgpu::BlendFactor::One,
        device::BlendFactor::Zero => wgpu::BlendFactor::Zero,
        device::BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        device::BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        device::BlendFactor::InvSrcColor => wgpu::BlendFactor::OneMinusSrc,
        device::BlendFactor::InvSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        device::BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        device::BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        device::BlendFactor::InvDstColor => wgpu::BlendFactor::OneMinusDst,
        device::BlendFactor::InvDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_operation(op: device::BlendOp) -> wgpu::BlendOperation {
    match op {
        device::BlendOp::Add => wgpu::BlendOperation::Add,
        device::BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        device::BlendOp::RevSubtract => wgpu::BlendOperation::ReverseSubtract,
        device::BlendOp::Min => wgpu::BlendOperation::Min,
        device::BlendOp::Max => wgpu::BlendOperation::Max,
    }
}

fn stencil_operation(op: device::StencilOp) -> wgpu::StencilOperation {
    match op {
        device::StencilOp::Keep => wgpu::StencilOperation::Keep,
        device::StencilOp::Zero => wgpu::StencilOperation::Zero,
        device::StencilOp::Invert => wgpu::StencilOperation::Invert,
        device::StencilOp::Replace => wgpu::StencilOperation::Replace,
        device::StencilOp::Incr => wgpu::StencilOperation::IncrementWrap,
        device::StencilOp::IncrSat => wgpu::StencilOperation::IncrementClamp,
        device::StencilOp::Decr => wgpu::StencilOperation::DecrementWrap,
        device::StencilOp::DecrSat => wgpu::StencilOperation::DecrementClamp,
    }
}

fn compare_function(func: device::CompareFunc) -> wgpu::CompareFunction {
    match func {
        device::CompareFunc::Always => wgpu::CompareFunction::Always,
        device::CompareFunc::Never => wgpu::CompareFunction::Never,
        device::CompareFunc::Equal => wgpu::CompareFunction::Equal,
        device::CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        device::CompareFunc::Less => wgpu::CompareFunction::Less,
        device::CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        device::CompareFunc::Greater => wgpu::CompareFunction::Greater,
        device::CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
    }
}

fn blend_state(desc: &BlendDesc) -> Option<wgpu::BlendState> {
    desc.enable.then(|| wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(desc.src_blend),
            dst_factor: blend_factor(desc.dest_blend),
            operation: blend_operation(desc.blend_op),
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(desc.src_blend_alpha),
            dst_factor: blend_factor(desc.dest_blend_alpha),
            operation: blend_operation(desc.blend_op_alpha),
        },
    })
}

fn stencil_state(desc: &DepthStencilDesc) -> wgpu::StencilState {
    let face = if desc.stencil_enable {
        wgpu::StencilFaceState {
            compare: compare_function(desc.stencil_comparison),
            fail_op: stencil_operation(desc.stencil_op_fail),
            depth_fail_op: stencil_operation(desc.stencil_op_depth_fail),
            pass_op: stencil_operation(desc.stencil_op_pass),
        }
    } else {
        wgpu::StencilFaceState::IGNORE
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: desc.stencil_read_mask as u32,
        write_mask: desc.stencil_write_mask as u32,
    }
}

/// Shader resource binding recovered by reflecting the generated source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReflectedBinding {
    group: u32,
    binding: u32,
    kind: BindingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Uniform,
    Texture,
    Sampler,
}

struct TextureEntry {
    texture: wgpu::Texture,
    desc: TextureDesc,
}

struct ViewEntry {
    view: wgpu::TextureView,
    texture: TextureId,
    desc: ViewDesc,
}

struct ShaderEntry {
    module: wgpu::ShaderModule,
    entry_point: String,
    bindings: Vec<ReflectedBinding>,
}

enum QueryEntry {
    /// Timer-validity stand-in; wgpu clocks are never disjoint
    Disjoint,
    Timestamp {
        query_set: Option<wgpu::QuerySet>,
        resolve_buffer: Option<wgpu::Buffer>,
        read_buffer: Option<wgpu::Buffer>,
        pending: Option<mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>>,
        value: Option<u64>,
    },
}

#[derive(Default)]
struct BoundState {
    vertex_shader: Option<ShaderId>,
    pixel_shader: Option<ShaderId>,
    blend: Option<BlendStateId>,
    depth_stencil: Option<DepthStencilStateId>,
    stencil_ref: u32,
    samplers: Vec<Option<SamplerId>>,
    shader_resources: Vec<Option<ViewId>>,
    render_targets: Vec<Option<ViewId>>,
    depth_stencil_view: Option<ViewId>,
    viewport: (u32, u32),
    constant_buffer: Option<BufferId>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex_shader: ShaderId,
    pixel_shader: ShaderId,
    blend: BlendDesc,
    depth_stencil: Option<DepthStencilDesc>,
    targets: Vec<wgpu::TextureFormat>,
}

/// [`GpuDevice`] adapter over a wgpu device/queue pair
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,

    textures: HashMap<TextureId, TextureEntry>,
    views: HashMap<ViewId, ViewEntry>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    blend_states: HashMap<BlendStateId, BlendDesc>,
    depth_stencil_states: HashMap<DepthStencilStateId, DepthStencilDesc>,
    shaders: HashMap<ShaderId, ShaderEntry>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    queries: HashMap<QueryId, QueryEntry>,

    bound: BoundState,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    blit_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    blit_layout: wgpu::BindGroupLayout,
    blit_sampler: wgpu::Sampler,

    dummy_view: wgpu::TextureView,
    dummy_sampler: wgpu::Sampler,
    dummy_uniform: wgpu::Buffer,

    timestamps_supported: bool,
    clamp_to_border_supported: bool,
    /// Timestamp ticks per second, derived from the queue's tick period
    frequency: u64,
}

impl WgpuDevice {
    /// Wrap an existing device/queue pair
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let features = device.features();
        let timestamps_supported = features.contains(wgpu::Features::TIMESTAMP_QUERY)
            && features.contains(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS);
        let clamp_to_border_supported =
            features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);

        let period = queue.get_timestamp_period();
        let frequency = if period > 0.0 {
            (1_000_000_000.0 / period as f64) as u64
        } else {
            1_000_000_000
        };

        let dummy_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("dummy"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let dummy_view = dummy_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let dummy_sampler = device.create_sampler(&wgpu::SamplerDescriptor::default());
        let dummy_uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dummy uniform"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let blit_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            next_id: 0,
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            blend_states: HashMap::new(),
            depth_stencil_states: HashMap::new(),
            shaders: HashMap::new(),
            buffers: HashMap::new(),
            queries: HashMap::new(),
            bound: BoundState::default(),
            pipelines: HashMap::new(),
            blit_pipelines: HashMap::new(),
            blit_layout,
            blit_sampler,
            dummy_view,
            dummy_sampler,
            dummy_uniform,
            timestamps_supported,
            clamp_to_border_supported,
            frequency,
        }
    }

    /// Create an instance, adapter and device, then wrap them
    pub fn create() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|e| DeviceError::StateCreation(format!("no suitable adapter: {e}")))?;

        let mut features = wgpu::Features::empty();
        for wanted in [
            wgpu::Features::TIMESTAMP_QUERY,
            wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS,
            wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER,
            // 16-bit normalized texture formats are optional in wgpu
            wgpu::Features::TEXTURE_FORMAT_16BIT_NORM,
        ] {
            if adapter.features().contains(wanted) {
                features |= wanted;
            }
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("prism"),
            required_features: features,
            ..Default::default()
        }))
        .map_err(|e| DeviceError::StateCreation(format!("device request failed: {e}")))?;

        Ok(Self::new(device, queue))
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Register a host-owned texture (e.g. the swapchain surface) under a
    /// handle the engine can reference
    pub fn import_texture(&mut self, texture: wgpu::Texture, desc: &TextureDesc) -> TextureId {
        let id = TextureId(self.next());
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                desc: desc.clone(),
            },
        );
        id
    }

    fn reflect_bindings(source: &str) -> Vec<ReflectedBinding> {
        let Ok(module) = naga::front::wgsl::parse_str(source) else {
            return Vec::new();
        };
        let mut bindings = Vec::new();
        for (_, var) in module.global_variables.iter() {
            let Some(ref resource) = var.binding else {
                continue;
            };
            let kind = match module.types[var.ty].inner {
                naga::TypeInner::Image { .. } => BindingKind::Texture,
                naga::TypeInner::Sampler { .. } => BindingKind::Sampler,
                _ if var.space == naga::AddressSpace::Uniform => BindingKind::Uniform,
                _ => continue,
            };
            bindings.push(ReflectedBinding {
                group: resource.group,
                binding: resource.binding,
                kind,
            });
        }
        bindings
    }

    fn address_mode(&self, mode: device::AddressMode) -> wgpu::AddressMode {
        match mode {
            device::AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
            device::AddressMode::Wrap => wgpu::AddressMode::Repeat,
            device::AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
            device::AddressMode::Border if self.clamp_to_border_supported => {
                wgpu::AddressMode::ClampToBorder
            }
            // Closest supported behavior when the border feature is absent
            device::AddressMode::Border => wgpu::AddressMode::ClampToEdge,
        }
    }

    fn pipeline_for(&mut self, key: PipelineKey) -> Option<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Some(pipeline.clone());
        }

        let vs = self.shaders.get(&key.vertex_shader)?;
        let ps = self.shaders.get(&key.pixel_shader)?;

        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .targets
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: blend_state(&key.blend),
                    write_mask: wgpu::ColorWrites::from_bits_truncate(key.blend.write_mask as u32),
                })
            })
            .collect();

        let depth_stencil = key.depth_stencil.map(|desc| wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth24PlusStencil8,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: stencil_state(&desc),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("effect pass"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: Some(&vs.entry_point),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &ps.module,
                    entry_point: Some(&ps.entry_point),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
                cache: None,
            });

        self.pipelines.insert(key, pipeline.clone());
        Some(pipeline)
    }

    fn blit_pipeline_for(&mut self, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.blit_pipelines.get(&format) {
            return pipeline.clone();
        }
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("blit"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_SHADER)),
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("blit"),
                bind_group_layouts: &[&self.blit_layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_blit"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("ps_blit"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            });
        self.blit_pipelines.insert(format, pipeline.clone());
        pipeline
    }
}

impl GpuDevice for WgpuDevice {
    fn feature_level(&self) -> FeatureLevel {
        let limits = self.device.limits();
        if limits.max_texture_dimension_2d >= 16384 && self.timestamps_supported {
            FeatureLevel::Extended
        } else if limits.max_texture_dimension_2d >= 8192 {
            FeatureLevel::Core
        } else {
            FeatureLevel::Compat
        }
    }

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            max_sampler_slots: limits.max_samplers_per_shader_stage,
            max_texture_slots: limits.max_sampled_textures_per_shader_stage,
            max_render_targets: limits.max_color_attachments,
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let format = texture_format(desc.format);
        let mut usage = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        if desc.shader_resource {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if desc.render_target || desc.depth_stencil || desc.generate_mips {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let view_formats: Vec<wgpu::TextureFormat> = match format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
                vec![
                    wgpu::TextureFormat::Rgba8Unorm,
                    wgpu::TextureFormat::Rgba8UnormSrgb,
                ]
            }
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
                vec![
                    wgpu::TextureFormat::Bgra8Unorm,
                    wgpu::TextureFormat::Bgra8UnormSrgb,
                ]
            }
            _ => Vec::new(),
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: desc.sample_count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &view_formats,
        });

        let id = TextureId(self.next());
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id).map(|entry| entry.desc.clone())
    }

    fn create_view(&mut self, texture: TextureId, desc: &ViewDesc) -> Result<ViewId, DeviceError> {
        let entry = self
            .textures
            .get(&texture)
            .ok_or_else(|| DeviceError::ViewCreation {
                name: String::new(),
                kind: desc.kind,
                format: desc.format,
            })?;

        let format = texture_format(desc.format);
        let aspect = if desc.kind == ViewKind::ShaderResource
            && format == wgpu::TextureFormat::Depth24PlusStencil8
        {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        let mip_level_count = match desc.kind {
            ViewKind::ShaderResource => Some(desc.mip_levels.max(1)),
            ViewKind::RenderTarget | ViewKind::DepthStencil => Some(1),
        };

        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&entry.desc.label),
            format: Some(format),
            dimension: Some(wgpu::TextureViewDimension::D2),
            usage: None,
            aspect,
            base_mip_level: 0,
            mip_level_count,
            base_array_layer: 0,
            array_layer_count: None,
        });

        let id = ViewId(self.next());
        self.views.insert(
            id,
            ViewEntry {
                view,
                texture,
                desc: *desc,
            },
        );
        Ok(id)
    }

    fn destroy_view(&mut self, id: ViewId) {
        self.views.remove(&id);
    }

    fn view_texture(&self, id: ViewId) -> Option<TextureId> {
        self.views.get(&id).map(|entry| entry.texture)
    }

    fn view_desc(&self, id: ViewId) -> Option<ViewDesc> {
        self.views.get(&id).map(|entry| entry.desc)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        let (mag, min, mip) = match desc.filter {
            device::FilterMode::Point => (
                wgpu::FilterMode::Nearest,
                wgpu::FilterMode::Nearest,
                wgpu::FilterMode::Nearest,
            ),
            device::FilterMode::Bilinear => (
                wgpu::FilterMode::Linear,
                wgpu::FilterMode::Linear,
                wgpu::FilterMode::Nearest,
            ),
            device::FilterMode::Trilinear => (
                wgpu::FilterMode::Linear,
                wgpu::FilterMode::Linear,
                wgpu::FilterMode::Linear,
            ),
        };

        // wgpu samplers carry no LOD bias; the clamp range is honored
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: self.address_mode(desc.address_u),
            address_mode_v: self.address_mode(desc.address_v),
            address_mode_w: self.address_mode(desc.address_w),
            mag_filter: mag,
            min_filter: min,
            mipmap_filter: mip,
            lod_min_clamp: desc.min_lod,
            lod_max_clamp: desc.max_lod,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });

        let id = SamplerId(self.next());
        self.samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&mut self, id: SamplerId) {
        self.samplers.remove(&id);
    }

    fn create_blend_state(&mut self, desc: &BlendDesc) -> Result<BlendStateId, DeviceError> {
        // Folded into the render pipeline at draw time
        let id = BlendStateId(self.next());
        self.blend_states.insert(id, *desc);
        Ok(id)
    }

    fn destroy_blend_state(&mut self, id: BlendStateId) {
        self.blend_states.remove(&id);
    }

    fn create_depth_stencil_state(
        &mut self,
        desc: &DepthStencilDesc,
    ) -> Result<DepthStencilStateId, DeviceError> {
        let id = DepthStencilStateId(self.next());
        self.depth_stencil_states.insert(id, *desc);
        Ok(id)
    }

    fn destroy_depth_stencil_state(&mut self, id: DepthStencilStateId) {
        self.depth_stencil_states.remove(&id);
    }

    fn create_shader(&mut self, shader: &CompiledShader) -> Result<ShaderId, DeviceError> {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&shader.entry_point),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&shader.source)),
            });
        let bindings = Self::reflect_bindings(&shader.source);

        let id = ShaderId(self.next());
        self.shaders.insert(
            id,
            ShaderEntry {
                module,
                entry_point: shader.entry_point.clone(),
                bindings,
            },
        );
        Ok(id)
    }

    fn destroy_shader(&mut self, id: ShaderId) {
        self.shaders.remove(&id);
        self.pipelines
            .retain(|key, _| key.vertex_shader != id && key.pixel_shader != id);
    }

    fn create_constant_buffer(
        &mut self,
        label: &str,
        data: &[u8],
    ) -> Result<BufferId, DeviceError> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let id = BufferId(self.next());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn update_constant_buffer(&mut self, id: BufferId, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(&id) {
            self.queue.write_buffer(buffer, 0, data);
        }
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn upload_texture(&mut self, id: TextureId, data: &[u8], row_pitch: u32) {
        let Some(entry) = self.textures.get(&id) else {
            return;
        };
        self.queue.write_texture(
            entry.texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_pitch),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: entry.desc.width,
                height: entry.desc.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn generate_mips(&mut self, view: ViewId) {
        let Some(texture_id) = self.view_texture(view) else {
            return;
        };
        let Some(entry) = self.textures.get(&texture_id) else {
            return;
        };
        let levels = entry.desc.mip_levels;
        if levels < 2 {
            return;
        }
        let format = texture_format(entry.desc.format);
        let texture = entry.texture.clone();
        let pipeline = self.blit_pipeline_for(format);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mip generation"),
            });
        for level in 1..levels {
            let source = texture.create_view(&wgpu::TextureViewDescriptor {
                label: None,
                format: Some(format),
                dimension: Some(wgpu::TextureViewDimension::D2),
                usage: None,
                aspect: wgpu::TextureAspect::All,
                base_mip_level: level - 1,
                mip_level_count: Some(1),
                base_array_layer: 0,
                array_layer_count: None,
            });
            let target = texture.create_view(&wgpu::TextureViewDescriptor {
                label: None,
                format: Some(format),
                dimension: Some(wgpu::TextureViewDimension::D2),
                usage: None,
                aspect: wgpu::TextureAspect::All,
                base_mip_level: level,
                mip_level_count: Some(1),
                base_array_layer: 0,
                array_layer_count: None,
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mip blit"),
                layout: &self.blit_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.blit_sampler),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mip blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) {
        let (Some(src), Some(dst)) = (self.textures.get(&src), self.textures.get(&dst)) else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture copy"),
            });
        encoder.copy_texture_to_texture(
            src.texture.as_image_copy(),
            dst.texture.as_image_copy(),
            wgpu::Extent3d {
                width: src.desc.width.min(dst.desc.width),
                height: src.desc.height.min(dst.desc.height),
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
    }

    fn resolve_texture(&mut self, src: TextureId, dst: TextureId, format: NativeFormat) {
        let (Some(src), Some(dst)) = (self.textures.get(&src), self.textures.get(&dst)) else {
            return;
        };
        let view_format = texture_format(format);
        let src_view = src.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(view_format),
            ..Default::default()
        });
        let dst_view = dst.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(view_format),
            ..Default::default()
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("multisample resolve"),
            });
        // A load+resolve pass with no draws performs the resolve
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("multisample resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &src_view,
                depth_slice: None,
                resolve_target: Some(&dst_view),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
    }

    fn read_texture(&mut self, id: TextureId) -> Result<TextureData, DeviceError> {
        let entry = self
            .textures
            .get(&id)
            .ok_or_else(|| DeviceError::Readback("unknown texture".to_string()))?;

        let bpp = bytes_per_pixel(entry.desc.format);
        let unpadded = entry.desc.width * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let size = padded as u64 * entry.desc.height as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("screenshot staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("screenshot staging"),
            });
        encoder.copy_texture_to_buffer(
            entry.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: entry.desc.width,
                height: entry.desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        let _ = self.device.poll(wgpu::PollType::Wait);
        receiver
            .recv()
            .map_err(|_| DeviceError::Readback("map callback dropped".to_string()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;

        let data = staging.slice(..).get_mapped_range().to_vec();
        staging.unmap();
        Ok(TextureData {
            data,
            row_pitch: padded as usize,
        })
    }

    fn set_shaders(&mut self, vs: Option<ShaderId>, ps: Option<ShaderId>) {
        self.bound.vertex_shader = vs;
        self.bound.pixel_shader = ps;
    }

    fn set_blend_state(&mut self, state: Option<BlendStateId>) {
        self.bound.blend = state;
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>, stencil_ref: u32) {
        self.bound.depth_stencil = state;
        self.bound.stencil_ref = stencil_ref;
    }

    fn set_samplers(&mut self, samplers: &[Option<SamplerId>]) {
        self.bound.samplers = samplers.to_vec();
    }

    fn set_shader_resources(&mut self, views: &[Option<ViewId>]) {
        self.bound.shader_resources = views.to_vec();
    }

    fn set_render_targets(&mut self, targets: &[Option<ViewId>], depth_stencil: Option<ViewId>) {
        self.bound.render_targets = targets.to_vec();
        self.bound.depth_stencil_view = depth_stencil;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.bound.viewport = (width, height);
    }

    fn set_constant_buffer(&mut self, buffer: Option<BufferId>) {
        self.bound.constant_buffer = buffer;
    }

    fn clear_render_target(&mut self, view: ViewId, color: [f32; 4]) {
        let Some(entry) = self.views.get(&view) else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &entry.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0] as f64,
                        g: color[1] as f64,
                        b: color[2] as f64,
                        a: color[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
    }

    fn clear_stencil(&mut self, view: ViewId, value: u8) {
        let Some(entry) = self.views.get(&view) else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stencil clear"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("stencil clear"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &entry.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(value as u32),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
    }

    fn draw(&mut self, vertex_count: u32) {
        let (Some(vs_id), Some(ps_id)) = (self.bound.vertex_shader, self.bound.pixel_shader)
        else {
            return;
        };

        let mut targets = Vec::new();
        let mut target_formats = Vec::new();
        for slot in &self.bound.render_targets {
            let Some(entry) = slot.and_then(|id| self.views.get(&id)) else {
                continue;
            };
            targets.push(entry.view.clone());
            target_formats.push(texture_format(entry.desc.format));
        }
        let depth_view = self
            .bound
            .depth_stencil_view
            .and_then(|id| self.views.get(&id))
            .map(|entry| entry.view.clone());
        if targets.is_empty() && depth_view.is_none() {
            return;
        }

        let blend = self
            .bound
            .blend
            .and_then(|id| self.blend_states.get(&id).copied())
            .unwrap_or_default();
        let depth_stencil = depth_view.as_ref().map(|_| {
            self.bound
                .depth_stencil
                .and_then(|id| self.depth_stencil_states.get(&id).copied())
                .unwrap_or_default()
        });

        let key = PipelineKey {
            vertex_shader: vs_id,
            pixel_shader: ps_id,
            blend,
            depth_stencil,
            targets: target_formats,
        };
        let Some(pipeline) = self.pipeline_for(key) else {
            return;
        };

        // Merge the binding sets both stages declare
        let mut bindings: Vec<ReflectedBinding> = Vec::new();
        for id in [vs_id, ps_id] {
            if let Some(entry) = self.shaders.get(&id) {
                for binding in &entry.bindings {
                    if !bindings.contains(binding) {
                        bindings.push(*binding);
                    }
                }
            }
        }
        let mut bind_groups = Vec::new();
        let group_count = bindings.iter().map(|b| b.group + 1).max().unwrap_or(0);
        for group in 0..group_count {
            let group_bindings: Vec<&ReflectedBinding> =
                bindings.iter().filter(|b| b.group == group).collect();
            let mut entries = Vec::new();
            for binding in &group_bindings {
                let slot = binding.binding as usize;
                let resource = match binding.kind {
                    BindingKind::Uniform => {
                        let buffer = self
                            .bound
                            .constant_buffer
                            .and_then(|id| self.buffers.get(&id))
                            .unwrap_or(&self.dummy_uniform);
                        wgpu::BindingResource::Buffer(buffer.as_entire_buffer_binding())
                    }
                    BindingKind::Texture => {
                        let view = self
                            .bound
                            .shader_resources
                            .get(slot)
                            .copied()
                            .flatten()
                            .and_then(|id| self.views.get(&id))
                            .map(|entry| &entry.view)
                            .unwrap_or(&self.dummy_view);
                        wgpu::BindingResource::TextureView(view)
                    }
                    BindingKind::Sampler => {
                        let sampler = self
                            .bound
                            .samplers
                            .get(slot)
                            .copied()
                            .flatten()
                            .and_then(|id| self.samplers.get(&id))
                            .unwrap_or(&self.dummy_sampler);
                        wgpu::BindingResource::Sampler(sampler)
                    }
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: binding.binding,
                    resource,
                });
            }
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("effect pass"),
                layout: &pipeline.get_bind_group_layout(group),
                entries: &entries,
            });
            bind_groups.push(bind_group);
        }

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment =
            depth_view
                .as_ref()
                .map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("effect pass"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("effect pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_stencil_reference(self.bound.stencil_ref);
            let (width, height) = self.bound.viewport;
            if width > 0 && height > 0 {
                pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            }
            for (group, bind_group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(group as u32, bind_group, &[]);
            }
            pass.draw(0..vertex_count, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn create_timestamp_query(&mut self) -> Result<QueryId, DeviceError> {
        let entry = if self.timestamps_supported {
            let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("technique timestamp"),
                ty: wgpu::QueryType::Timestamp,
                count: 1,
            });
            let resolve_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp resolve"),
                size: 8,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let read_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp readback"),
                size: 8,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            QueryEntry::Timestamp {
                query_set: Some(query_set),
                resolve_buffer: Some(resolve_buffer),
                read_buffer: Some(read_buffer),
                pending: None,
                value: None,
            }
        } else {
            // Timing stays silently suppressed; polls never complete
            QueryEntry::Timestamp {
                query_set: None,
                resolve_buffer: None,
                read_buffer: None,
                pending: None,
                value: None,
            }
        };
        let id = QueryId(self.next());
        self.queries.insert(id, entry);
        Ok(id)
    }

    fn create_disjoint_query(&mut self) -> Result<QueryId, DeviceError> {
        let id = QueryId(self.next());
        self.queries.insert(id, QueryEntry::Disjoint);
        Ok(id)
    }

    fn destroy_query(&mut self, id: QueryId) {
        self.queries.remove(&id);
    }

    fn begin_disjoint_query(&mut self, _id: QueryId) {}

    fn end_disjoint_query(&mut self, _id: QueryId) {}

    fn write_timestamp(&mut self, id: QueryId) {
        let Some(QueryEntry::Timestamp {
            query_set: Some(query_set),
            resolve_buffer: Some(resolve_buffer),
            read_buffer: Some(read_buffer),
            pending,
            value,
        }) = self.queries.get_mut(&id)
        else {
            return;
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("timestamp"),
            });
        encoder.write_timestamp(query_set, 0);
        encoder.resolve_query_set(query_set, 0..1, resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(resolve_buffer, 0, read_buffer, 0, 8);
        self.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        read_buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        *pending = Some(receiver);
        *value = None;
    }

    fn poll_timestamp(&mut self, id: QueryId) -> Option<u64> {
        let _ = self.device.poll(wgpu::PollType::Poll);
        let Some(QueryEntry::Timestamp {
            read_buffer,
            pending,
            value,
            ..
        }) = self.queries.get_mut(&id)
        else {
            return None;
        };

        if let Some(receiver) = pending {
            match receiver.try_recv() {
                Ok(Ok(())) => {
                    if let Some(buffer) = read_buffer {
                        let ticks = {
                            let mapped = buffer.slice(..).get_mapped_range();
                            bytemuck::cast_slice::<u8, u64>(&mapped)[0]
                        };
                        buffer.unmap();
                        *value = Some(ticks);
                    }
                    *pending = None;
                }
                Ok(Err(_)) | Err(mpsc::TryRecvError::Disconnected) => {
                    *pending = None;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }
        *value
    }

    fn poll_disjoint(&mut self, id: QueryId) -> Option<DisjointResult> {
        match self.queries.get(&id) {
            Some(QueryEntry::Disjoint) => Some(DisjointResult {
                disjoint: false,
                frequency: self.frequency,
            }),
            _ => None,
        }
    }

    fn capture_state(&mut self) {
        // Draws encode self-contained render passes; there is no ambient
        // host pipeline state to save
    }

    fn restore_state(&mut self) {
        self.bound = BoundState::default();
    }
}
