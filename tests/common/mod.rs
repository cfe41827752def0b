//! Common test utilities and harness
//!
//! Provides a mock-device runtime harness plus builders for small effect
//! modules with valid generated WGSL, so integration tests can exercise the
//! full load/present/unload pipeline headlessly.

use std::cell::RefCell;
use std::rc::Rc;

use prism::depth::{DepthStats, DepthTracker};
use prism::device::{GpuDevice, NativeFormat, TextureDesc, TextureId};
use prism::mock::MockDevice;
use prism::runtime::{OutputDesc, Runtime};
use prism_fx as fx;

/// Generated source with one vertex and one pixel entry point and no bindings
pub const SIMPLE_WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index & 1u)) * 4.0 - 1.0;
    let y = f32(i32(index >> 1u)) * 4.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return vec4<f32>(0.25, 0.5, 0.75, 1.0);
}
"#;

/// Generated source that samples one texture through one sampler
pub const SAMPLED_WGSL: &str = r#"
@group(1) @binding(0) var source: texture_2d<f32>;
@group(2) @binding(0) var source_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index & 1u)) * 4.0 - 1.0;
    let y = f32(i32(index >> 1u)) * 4.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return textureSampleLevel(source, source_sampler, vec2<f32>(0.5, 0.5), 0.0);
}
"#;

/// Generated source with a uniform block at group 0
pub const UNIFORM_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> params: vec4<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index & 1u)) * 4.0 - 1.0;
    let y = f32(i32(index >> 1u)) * 4.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn ps_main() -> @location(0) vec4<f32> {
    return params;
}
"#;

pub fn entry_points() -> Vec<fx::EntryPoint> {
    vec![
        fx::EntryPoint {
            name: "vs_main".into(),
            stage: fx::ShaderStage::Vertex,
        },
        fx::EntryPoint {
            name: "ps_main".into(),
            stage: fx::ShaderStage::Pixel,
        },
    ]
}

pub fn main_output_pass() -> fx::PassDesc {
    fx::PassDesc {
        vs_entry_point: "vs_main".into(),
        ps_entry_point: "ps_main".into(),
        ..Default::default()
    }
}

/// One technique, one pass, main output, no bindings
pub fn simple_module() -> fx::EffectModule {
    fx::EffectModule {
        source: SIMPLE_WGSL.into(),
        entry_points: entry_points(),
        techniques: vec![fx::TechniqueDesc {
            name: "Simple".into(),
            passes: vec![main_output_pass()],
        }],
        ..Default::default()
    }
}

/// One technique sampling `texture` at sampler slot 0 / texture slot 0
pub fn sampled_module(texture: fx::TextureDecl, pass: fx::PassDesc) -> fx::EffectModule {
    let texture_name = texture.unique_name.clone();
    fx::EffectModule {
        source: SAMPLED_WGSL.into(),
        entry_points: entry_points(),
        samplers: vec![fx::SamplerDecl {
            unique_name: "source_sampler".into(),
            texture_name,
            binding: 0,
            texture_binding: 0,
            ..Default::default()
        }],
        textures: vec![texture],
        techniques: vec![fx::TechniqueDesc {
            name: "Sampled".into(),
            passes: vec![pass],
        }],
        ..Default::default()
    }
}

pub type TrackerLog = Rc<RefCell<Vec<(u32, u32, Option<TextureId>, u32)>>>;

/// Depth tracker driven by a scripted selection sequence, with a shared log
/// of every query the runtime makes
pub struct SequenceTracker {
    selections: Rc<RefCell<Vec<Option<TextureId>>>>,
    queries: TrackerLog,
}

impl SequenceTracker {
    /// Returns the tracker and a handle to its query log; selections are
    /// consumed front to back, then `None` is reported
    pub fn new(selections: Vec<Option<TextureId>>) -> (Self, TrackerLog) {
        let queries: TrackerLog = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                selections: Rc::new(RefCell::new(selections)),
                queries: queries.clone(),
            },
            queries,
        )
    }
}

impl DepthTracker for SequenceTracker {
    fn find_best(
        &mut self,
        filter_width: u32,
        height: u32,
        override_handle: Option<TextureId>,
        preserve_clear_index: u32,
    ) -> Option<TextureId> {
        self.queries
            .borrow_mut()
            .push((filter_width, height, override_handle, preserve_clear_index));
        let mut selections = self.selections.borrow_mut();
        if selections.is_empty() {
            None
        } else {
            selections.remove(0)
        }
    }

    fn counters(&self) -> Vec<(TextureId, DepthStats)> {
        Vec::new()
    }
}

/// Runtime over a mock device with a host-owned back buffer
pub struct RuntimeHarness {
    pub runtime: Runtime<MockDevice>,
    pub back_buffer: TextureId,
    pub width: u32,
    pub height: u32,
}

impl RuntimeHarness {
    /// Single-sampled, directly renderable output
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_output(width, height, NativeFormat::Rgba8Unorm, 1, true)
    }

    pub fn with_output(
        width: u32,
        height: u32,
        format: NativeFormat,
        samples: u32,
        supports_direct_rendering: bool,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut runtime = Runtime::new(MockDevice::new());

        // The presentable surface belongs to the host
        let back_buffer = runtime
            .device_mut()
            .create_texture(&TextureDesc {
                label: "host back buffer".into(),
                width,
                height,
                sample_count: samples,
                format,
                render_target: true,
                ..Default::default()
            })
            .expect("mock texture creation cannot fail");

        runtime
            .on_init(&OutputDesc {
                width,
                height,
                format,
                samples,
                back_buffer,
                supports_direct_rendering,
            })
            .expect("output init should succeed on a mock device");

        Self {
            runtime,
            back_buffer,
            width,
            height,
        }
    }

    pub fn device(&self) -> &MockDevice {
        self.runtime.device()
    }

    pub fn device_mut(&mut self) -> &mut MockDevice {
        self.runtime.device_mut()
    }

    /// Forget all recorded device calls, typically right after setup
    pub fn clear_calls(&mut self) {
        self.runtime.device_mut().clear_calls();
    }

    pub fn present(&mut self) {
        self.runtime.on_present();
    }
}
