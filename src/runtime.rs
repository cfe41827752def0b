//! Frame orchestrator
//!
//! [`Runtime`] owns the device, the loaded effect set and all derived GPU
//! resources, and drives the per-present pipeline: depth source update, host
//! state capture, multisample resolve or intermediate aliasing, technique
//! execution in load order, copy-back into the presentable surface, and host
//! state restoration on every exit path.
//!
//! Device loss and swapchain resize are a full teardown (`on_reset`) followed
//! by a full `on_init`; there is no partial-resize path.

use crate::compiler::{CompiledShader, CompilerCell};
use crate::depth::DepthTracker;
use crate::device::{
    DeviceError, FilterMode, GpuDevice, NativeFormat, SamplerDesc, SamplerId, ShaderId,
    TextureDesc, TextureId, ViewDesc, ViewId, ViewKind,
};
use crate::effect::Effect;
use crate::formats;
use crate::state_cache::StateObjectCache;
use crate::technique::Technique;
use crate::textures::{ReferenceViews, TextureManager};
use prism_fx::ShaderStage;

/// Fullscreen-triangle copy pass used for the intermediate copy-back path
const COPY_SHADER: &str = r#"
struct CopyOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(1) @binding(0) var source: texture_2d<f32>;
@group(2) @binding(0) var source_sampler: sampler;

@vertex
fn vs_copy(@builtin(vertex_index) index: u32) -> CopyOutput {
    var out: CopyOutput;
    out.uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    out.position = vec4<f32>(out.uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    return out;
}

@fragment
fn ps_copy(in: CopyOutput) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}
"#;

/// Description of the presentable output surface handed over by the host
#[derive(Debug, Clone, Copy)]
pub struct OutputDesc {
    pub width: u32,
    pub height: u32,
    pub format: NativeFormat,
    /// Multisample count of the surface, 1 for single-sampled
    pub samples: u32,
    /// The host-owned surface texture; never destroyed by the runtime
    pub back_buffer: TextureId,
    /// Whether the backend can render directly into the surface
    pub supports_direct_rendering: bool,
}

/// Draw statistics accumulated over one present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub drawcalls: u32,
    pub vertices: u32,
}

/// Effect post-processing runtime over one graphics device
pub struct Runtime<D: GpuDevice> {
    pub(crate) device: D,
    pub(crate) compiler: CompilerCell,
    pub(crate) state_cache: StateObjectCache,
    pub(crate) textures: TextureManager,
    pub(crate) effects: Vec<Option<Effect>>,
    pub(crate) techniques: Vec<Technique>,
    pub(crate) depth_tracker: Option<Box<dyn DepthTracker>>,

    pub(crate) initialized: bool,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) output_format: NativeFormat,
    pub(crate) samples: u32,

    /// Host-owned presentable surface
    pub(crate) back_buffer: Option<TextureId>,
    /// Surface techniques render into; aliases `back_buffer` when the output
    /// is single-sampled and directly renderable
    pub(crate) back_buffer_resolved: Option<TextureId>,
    pub(crate) back_buffer_resolved_srv: Option<ViewId>,
    /// Render-target views on the resolved surface, linear and gamma
    pub(crate) back_buffer_rtv: [Option<ViewId>; 2],
    /// Render-target view on the true surface, target of the copy-back pass
    pub(crate) copy_back_rtv: Option<ViewId>,
    /// Pre-pass snapshot the back-buffer reference texture reads
    pub(crate) back_buffer_texture: Option<TextureId>,
    pub(crate) back_buffer_texture_srv: [Option<ViewId>; 2],
    /// Shared stencil surface for passes with stencil testing enabled
    pub(crate) effect_stencil: Option<TextureId>,
    pub(crate) effect_stencil_view: Option<ViewId>,
    pub(crate) copy_vertex_shader: Option<ShaderId>,
    pub(crate) copy_pixel_shader: Option<ShaderId>,
    pub(crate) copy_sampler: Option<SamplerId>,

    /// Currently selected scene depth resource, owned by the host
    pub(crate) depth_texture: Option<TextureId>,
    pub(crate) depth_texture_srv: Option<ViewId>,
    pub(crate) depth_texture_override: Option<TextureId>,
    pub(crate) preserve_depth_buffers: bool,
    pub(crate) depth_clear_index_override: u32,
    pub(crate) filter_aspect_ratio: bool,

    pub(crate) frame_stats: FrameStats,
}

impl<D: GpuDevice> Runtime<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            compiler: CompilerCell::with_default_loaders(),
            state_cache: StateObjectCache::new(),
            textures: TextureManager::new(),
            effects: Vec::new(),
            techniques: Vec::new(),
            depth_tracker: None,
            initialized: false,
            width: 0,
            height: 0,
            output_format: NativeFormat::Rgba8Unorm,
            samples: 1,
            back_buffer: None,
            back_buffer_resolved: None,
            back_buffer_resolved_srv: None,
            back_buffer_rtv: [None, None],
            copy_back_rtv: None,
            back_buffer_texture: None,
            back_buffer_texture_srv: [None, None],
            effect_stencil: None,
            effect_stencil_view: None,
            copy_vertex_shader: None,
            copy_pixel_shader: None,
            copy_sampler: None,
            depth_texture: None,
            depth_texture_srv: None,
            depth_texture_override: None,
            preserve_depth_buffers: false,
            depth_clear_index_override: u32::MAX,
            filter_aspect_ratio: false,
            frame_stats: FrameStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn set_depth_tracker(&mut self, tracker: Box<dyn DepthTracker>) {
        self.depth_tracker = Some(tracker);
    }

    /// Apply the persisted depth settings (see `prism_config::DepthConfig`)
    pub fn apply_depth_config(&mut self, config: &prism_config::DepthConfig) {
        self.preserve_depth_buffers = config.preserve_depth_buffers;
        self.set_depth_clear_index_override(config.clear_index_override);
        self.filter_aspect_ratio = config.use_aspect_ratio_heuristics;
    }

    /// Clear index at which depth buffer contents are preserved
    ///
    /// An index of 0 cannot mean both "disabled" and "first clear", so 0 is
    /// reinterpreted as the maximum representable index (preservation off).
    pub fn set_depth_clear_index_override(&mut self, index: u32) {
        self.depth_clear_index_override = if index == 0 { u32::MAX } else { index };
    }

    pub fn set_depth_texture_override(&mut self, texture: Option<TextureId>) {
        self.depth_texture_override = texture;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Statistics of the most recent present
    pub fn frame_stats(&self) -> FrameStats {
        self.frame_stats
    }

    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    pub fn techniques_mut(&mut self) -> &mut [Technique] {
        &mut self.techniques
    }

    /// Reference views the back-buffer and depth pseudo-textures alias
    pub(crate) fn reference_views(&self) -> ReferenceViews {
        ReferenceViews {
            back_buffer: self.back_buffer_texture_srv,
            depth: self.depth_texture_srv,
        }
    }

    /// Create all output-sized frame resources for a new swapchain
    ///
    /// On failure everything partially created is released and the runtime
    /// stays uninitialized.
    pub fn on_init(&mut self, output: &OutputDesc) -> Result<(), DeviceError> {
        match self.init_output(output) {
            Ok(()) => {
                self.initialized = true;
                log::info!(
                    "Initialized {}x{} output ({:?}, {} samples)",
                    output.width,
                    output.height,
                    output.format,
                    output.samples
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Output initialization failed: {e}");
                self.on_reset();
                Err(e)
            }
        }
    }

    fn init_output(&mut self, output: &OutputDesc) -> Result<(), DeviceError> {
        self.width = output.width;
        self.height = output.height;
        self.output_format = output.format;
        self.samples = output.samples;
        self.back_buffer = Some(output.back_buffer);

        let storage_format = formats::normal_format(output.format);
        let needs_resolve = output.samples > 1
            || formats::normal_format(output.format) != output.format
            || !output.supports_direct_rendering;

        if needs_resolve {
            let resolved = self.device.create_texture(&TextureDesc {
                label: "back buffer resolved".to_string(),
                width: output.width,
                height: output.height,
                mip_levels: 1,
                sample_count: 1,
                format: storage_format,
                render_target: true,
                shader_resource: true,
                depth_stencil: false,
                generate_mips: false,
            })?;
            self.back_buffer_resolved = Some(resolved);
            self.back_buffer_resolved_srv = Some(self.device.create_view(
                resolved,
                &ViewDesc {
                    kind: ViewKind::ShaderResource,
                    format: storage_format,
                    mip_levels: 1,
                },
            )?);
            self.copy_back_rtv = Some(self.device.create_view(
                output.back_buffer,
                &ViewDesc {
                    kind: ViewKind::RenderTarget,
                    format: output.format,
                    mip_levels: 1,
                },
            )?);
        } else {
            self.back_buffer_resolved = Some(output.back_buffer);
        }

        let render_surface = self.back_buffer_resolved.ok_or(DeviceError::TextureCreation {
            name: "back buffer resolved".to_string(),
            width: output.width,
            height: output.height,
            levels: 1,
            format: storage_format,
        })?;
        self.back_buffer_rtv[0] = Some(self.device.create_view(
            render_surface,
            &ViewDesc {
                kind: ViewKind::RenderTarget,
                format: formats::normal_format(storage_format),
                mip_levels: 1,
            },
        )?);
        self.back_buffer_rtv[1] = Some(self.device.create_view(
            render_surface,
            &ViewDesc {
                kind: ViewKind::RenderTarget,
                format: formats::srgb_format(storage_format),
                mip_levels: 1,
            },
        )?);

        // Snapshot texture a pass reads the pre-pass output through
        let snapshot = self.device.create_texture(&TextureDesc {
            label: "back buffer snapshot".to_string(),
            width: output.width,
            height: output.height,
            mip_levels: 1,
            sample_count: 1,
            format: storage_format,
            render_target: false,
            shader_resource: true,
            depth_stencil: false,
            generate_mips: false,
        })?;
        self.back_buffer_texture = Some(snapshot);
        self.back_buffer_texture_srv[0] = Some(self.device.create_view(
            snapshot,
            &ViewDesc {
                kind: ViewKind::ShaderResource,
                format: formats::normal_format(storage_format),
                mip_levels: 1,
            },
        )?);
        self.back_buffer_texture_srv[1] = if formats::has_distinct_srgb(storage_format) {
            Some(self.device.create_view(
                snapshot,
                &ViewDesc {
                    kind: ViewKind::ShaderResource,
                    format: formats::srgb_format(storage_format),
                    mip_levels: 1,
                },
            )?)
        } else {
            self.back_buffer_texture_srv[0]
        };

        let stencil = self.device.create_texture(&TextureDesc {
            label: "effect stencil".to_string(),
            width: output.width,
            height: output.height,
            mip_levels: 1,
            sample_count: 1,
            format: NativeFormat::D24UnormS8Uint,
            render_target: false,
            shader_resource: false,
            depth_stencil: true,
            generate_mips: false,
        })?;
        self.effect_stencil = Some(stencil);
        self.effect_stencil_view = Some(self.device.create_view(
            stencil,
            &ViewDesc {
                kind: ViewKind::DepthStencil,
                format: NativeFormat::D24UnormS8Uint,
                mip_levels: 1,
            },
        )?);

        self.copy_vertex_shader = Some(self.device.create_shader(&CompiledShader {
            entry_point: "vs_copy".to_string(),
            stage: ShaderStage::Vertex,
            source: COPY_SHADER.to_string(),
        })?);
        self.copy_pixel_shader = Some(self.device.create_shader(&CompiledShader {
            entry_point: "ps_copy".to_string(),
            stage: ShaderStage::Pixel,
            source: COPY_SHADER.to_string(),
        })?);
        self.copy_sampler = Some(self.device.create_sampler(&SamplerDesc {
            filter: FilterMode::Point,
            ..SamplerDesc::default()
        })?);

        Ok(())
    }

    /// Release every output-sized resource and all loaded effects
    ///
    /// Safe to call repeatedly and on a never-initialized runtime.
    pub fn on_reset(&mut self) {
        self.unload_effects();

        let back_buffer = self.back_buffer.take();
        if let Some(resolved) = self.back_buffer_resolved.take()
            && Some(resolved) != back_buffer
        {
            self.device.destroy_texture(resolved);
        }
        if let Some(view) = self.back_buffer_resolved_srv.take() {
            self.device.destroy_view(view);
        }
        for slot in &mut self.back_buffer_rtv {
            if let Some(view) = slot.take() {
                self.device.destroy_view(view);
            }
        }
        if let Some(view) = self.copy_back_rtv.take() {
            self.device.destroy_view(view);
        }
        let shared_snapshot_srv = self.back_buffer_texture_srv[0] == self.back_buffer_texture_srv[1];
        if let Some(view) = self.back_buffer_texture_srv[0].take() {
            self.device.destroy_view(view);
        }
        if let Some(view) = self.back_buffer_texture_srv[1].take()
            && !shared_snapshot_srv
        {
            self.device.destroy_view(view);
        }
        if let Some(texture) = self.back_buffer_texture.take() {
            self.device.destroy_texture(texture);
        }
        if let Some(view) = self.effect_stencil_view.take() {
            self.device.destroy_view(view);
        }
        if let Some(texture) = self.effect_stencil.take() {
            self.device.destroy_texture(texture);
        }
        if let Some(shader) = self.copy_vertex_shader.take() {
            self.device.destroy_shader(shader);
        }
        if let Some(shader) = self.copy_pixel_shader.take() {
            self.device.destroy_shader(shader);
        }
        if let Some(sampler) = self.copy_sampler.take() {
            self.device.destroy_sampler(sampler);
        }
        if let Some(view) = self.depth_texture_srv.take() {
            self.device.destroy_view(view);
        }
        // The depth resource itself is host-owned
        self.depth_texture = None;

        self.initialized = false;
    }

    /// Run the post-processing pipeline over the current frame
    pub fn on_present(&mut self) {
        if !self.initialized {
            return;
        }

        self.frame_stats = FrameStats::default();
        self.update_depth_texture();

        self.device.capture_state();

        let back_buffer = self.back_buffer;
        let resolved = self.back_buffer_resolved;
        if let (Some(back_buffer), Some(resolved)) = (back_buffer, resolved)
            && back_buffer != resolved
        {
            if self.samples > 1 {
                self.device
                    .resolve_texture(back_buffer, resolved, self.output_format);
            } else {
                self.device.copy_texture(back_buffer, resolved);
            }
        }

        self.render_effects();

        if let (Some(back_buffer), Some(resolved)) = (back_buffer, resolved)
            && back_buffer != resolved
        {
            self.copy_back_pass();
        }

        self.device.restore_state();
    }

    /// Fullscreen-triangle copy from the resolved surface into the true one
    fn copy_back_pass(&mut self) {
        let Some(target) = self.copy_back_rtv else {
            return;
        };
        self.device
            .set_shaders(self.copy_vertex_shader, self.copy_pixel_shader);
        self.device.set_blend_state(None);
        self.device.set_depth_stencil_state(None, 0);
        self.device.set_samplers(&[self.copy_sampler]);
        self.device
            .set_shader_resources(&[self.back_buffer_resolved_srv]);
        self.device.set_render_targets(&[Some(target)], None);
        self.device.set_viewport(self.width, self.height);
        self.device.draw(3);
        self.device.set_render_targets(&[], None);
        self.device.set_shader_resources(&[None]);
    }
}
