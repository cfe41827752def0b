//! Frame pipeline functional tests
//!
//! Exercises the present pipeline against the mock device: resolve and
//! copy-back paths, technique timing collection, stencil handling, depth
//! source selection and teardown. No GPU required.

mod common;

use common::{RuntimeHarness, SequenceTracker, main_output_pass, sampled_module, simple_module};
use prism::device::{GpuDevice, NativeFormat, QueryId, TextureDesc};
use prism::mock::{DeviceCall, MockDevice};
use prism::runtime::Runtime;
use prism_fx as fx;

fn timestamp_writes(device: &MockDevice) -> Vec<QueryId> {
    device
        .calls
        .iter()
        .filter_map(|call| match call {
            DeviceCall::WriteTimestamp(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn disjoint_begins(device: &MockDevice) -> Vec<QueryId> {
    device
        .calls
        .iter()
        .filter_map(|call| match call {
            DeviceCall::BeginDisjointQuery(id) => Some(*id),
            _ => None,
        })
        .collect()
}

fn copy_count(device: &MockDevice) -> usize {
    device
        .calls
        .iter()
        .filter(|c| matches!(c, DeviceCall::CopyTexture { .. }))
        .count()
}

fn resolve_count(device: &MockDevice) -> usize {
    device
        .calls
        .iter()
        .filter(|c| matches!(c, DeviceCall::ResolveTexture { .. }))
        .count()
}

// === Present pipeline ===

#[test]
fn test_present_before_init_is_noop() {
    let mut runtime = Runtime::new(MockDevice::new());
    runtime.on_present();
    assert_eq!(runtime.device().call_count(), 0);
    assert!(!runtime.is_initialized());
}

#[test]
fn test_direct_output_present_with_no_effects_draws_nothing() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.clear_calls();

    harness.present();

    assert_eq!(harness.device().draw_count(), 0);
    assert_eq!(copy_count(harness.device()), 0);
    assert_eq!(harness.device().capture_count(), 1);
    assert_eq!(harness.device().restore_count(), 1);
}

#[test]
fn test_present_runs_enabled_technique() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());
    harness.clear_calls();

    harness.present();

    assert_eq!(harness.device().draw_count(), 1);
    // Pre-pass snapshot copy for the back-buffer pseudo-texture
    assert_eq!(copy_count(harness.device()), 1);
    assert_eq!(harness.runtime.frame_stats().drawcalls, 1);
    assert_eq!(harness.runtime.frame_stats().vertices, 3);

    // Main-output passes get the full output viewport by default
    assert!(harness.device().calls.iter().any(|c| matches!(
        c,
        DeviceCall::SetViewport {
            width: 640,
            height: 480
        }
    )));
}

#[test]
fn test_disabled_technique_is_skipped() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());
    harness.runtime.techniques_mut()[0].enabled = false;
    harness.clear_calls();

    harness.present();

    assert_eq!(harness.device().draw_count(), 0);
    assert_eq!(harness.runtime.frame_stats().drawcalls, 0);
}

#[test]
fn test_frame_stats_reset_each_present() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());

    harness.present();
    assert_eq!(harness.runtime.frame_stats().drawcalls, 1);

    harness.runtime.techniques_mut()[0].enabled = false;
    harness.present();
    assert_eq!(harness.runtime.frame_stats().drawcalls, 0);
}

// === Intermediate surface paths ===

#[test]
fn test_indirect_output_copies_in_and_back() {
    let mut harness =
        RuntimeHarness::with_output(640, 480, NativeFormat::Rgba8Unorm, 1, false);
    harness.clear_calls();

    harness.present();

    // Frame in via copy, frame out via the fullscreen copy pass
    assert_eq!(copy_count(harness.device()), 1);
    assert_eq!(harness.device().draw_count(), 1);
    assert_eq!(resolve_count(harness.device()), 0);
}

#[test]
fn test_multisampled_output_resolves() {
    let mut harness = RuntimeHarness::with_output(640, 480, NativeFormat::Rgba8Unorm, 4, true);
    harness.clear_calls();

    harness.present();

    assert_eq!(resolve_count(harness.device()), 1);
    assert_eq!(copy_count(harness.device()), 0);
    assert_eq!(harness.device().draw_count(), 1);
}

#[test]
fn test_srgb_surface_uses_intermediate() {
    // A gamma-typed surface cannot hold the linear working copy directly
    let mut harness =
        RuntimeHarness::with_output(640, 480, NativeFormat::Bgra8UnormSrgb, 1, true);
    harness.clear_calls();

    harness.present();

    assert_eq!(copy_count(harness.device()), 1);
    assert_eq!(harness.device().draw_count(), 1);
}

// === Technique timing ===

#[test]
fn test_timestamp_pair_issued_and_held_until_results_arrive() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());
    harness.clear_calls();

    harness.present();
    assert_eq!(harness.device().timestamp_write_count(), 2);
    assert_eq!(disjoint_begins(harness.device()).len(), 1);

    // Nothing scripted, so the pair is still pending; no new pair is issued
    harness.present();
    assert_eq!(harness.device().timestamp_write_count(), 2);
    assert!(harness.runtime.techniques()[0].average_gpu_duration.is_empty());
}

#[test]
fn test_timestamp_results_produce_one_sample() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());
    harness.clear_calls();

    harness.present();
    let writes = timestamp_writes(harness.device());
    let (begin, end) = (writes[0], writes[1]);
    let disjoint = disjoint_begins(harness.device())[0];

    harness.device_mut().script_disjoint(disjoint, false, 1_000_000_000);
    harness.device_mut().script_timestamp(begin, 1_000);
    harness.device_mut().script_timestamp(end, 3_000);

    harness.present();

    // (3000 - 1000) ticks at 1 GHz is 2000 ns
    assert_eq!(
        harness.runtime.techniques()[0].average_gpu_duration.average(),
        2_000
    );
    // Collection freed the pair, so a new one went out the same present
    assert_eq!(harness.device().timestamp_write_count(), 4);
}

#[test]
fn test_disjoint_interval_discards_sample() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());
    harness.clear_calls();

    harness.present();
    let writes = timestamp_writes(harness.device());
    let disjoint = disjoint_begins(harness.device())[0];

    harness.device_mut().script_disjoint(disjoint, true, 1_000_000_000);
    harness.device_mut().script_timestamp(writes[0], 1_000);
    harness.device_mut().script_timestamp(writes[1], 3_000);

    harness.present();

    assert!(harness.runtime.techniques()[0].average_gpu_duration.is_empty());
    // The slot was still freed for the next pair
    assert_eq!(harness.device().timestamp_write_count(), 4);
}

// === Stencil ===

#[test]
fn test_stencil_cleared_once_per_technique() {
    let mut harness = RuntimeHarness::new(640, 480);
    let stencil_pass = fx::PassDesc {
        stencil_enable: true,
        stencil_reference: 1,
        ..main_output_pass()
    };
    let module = fx::EffectModule {
        source: common::SIMPLE_WGSL.into(),
        entry_points: common::entry_points(),
        techniques: vec![fx::TechniqueDesc {
            name: "Stencil".into(),
            passes: vec![stencil_pass.clone(), stencil_pass],
        }],
        ..Default::default()
    };
    harness.runtime.load_effect("stencil", module);
    harness.clear_calls();

    harness.present();

    assert_eq!(harness.device().draw_count(), 2);
    assert_eq!(harness.device().stencil_clear_count(), 1);
    // Both full-viewport stencil passes bind the shared stencil surface
    let bound_stencil = harness
        .device()
        .calls
        .iter()
        .filter(|c| {
            matches!(
                c,
                DeviceCall::SetRenderTargets {
                    depth_stencil: Some(_),
                    ..
                }
            )
        })
        .count();
    assert_eq!(bound_stencil, 2);

    // Cleared again on the next invocation
    harness.present();
    assert_eq!(harness.device().stencil_clear_count(), 2);
}

#[test]
fn test_partial_viewport_pass_gets_no_stencil() {
    let mut harness = RuntimeHarness::new(640, 480);
    let module = fx::EffectModule {
        source: common::SIMPLE_WGSL.into(),
        entry_points: common::entry_points(),
        techniques: vec![fx::TechniqueDesc {
            name: "Partial".into(),
            passes: vec![fx::PassDesc {
                stencil_enable: true,
                viewport_width: 320,
                viewport_height: 240,
                ..main_output_pass()
            }],
        }],
        ..Default::default()
    };
    harness.runtime.load_effect("partial", module);
    harness.clear_calls();

    harness.present();

    assert_eq!(harness.device().stencil_clear_count(), 0);
    assert!(harness.device().calls.iter().all(|c| !matches!(
        c,
        DeviceCall::SetRenderTargets {
            depth_stencil: Some(_),
            ..
        }
    )));
}

// === Depth source selection ===

#[test]
fn test_depth_tracker_query_parameters() {
    let mut harness = RuntimeHarness::new(640, 480);
    let (tracker, log) = SequenceTracker::new(vec![None]);
    harness.runtime.set_depth_tracker(Box::new(tracker));

    harness.runtime.apply_depth_config(&prism_config::DepthConfig {
        preserve_depth_buffers: true,
        clear_index_override: 0,
        use_aspect_ratio_heuristics: true,
    });

    harness.present();

    let queries = log.borrow();
    assert_eq!(queries.len(), 1);
    let (filter_width, height, override_handle, clear_index) = queries[0];
    assert_eq!(filter_width, 640);
    assert_eq!(height, 480);
    assert_eq!(override_handle, None);
    // A clear index of 0 means "preserve before the final clear"
    assert_eq!(clear_index, u32::MAX);
}

#[test]
fn test_depth_disabled_preservation_reports_max_index() {
    let mut harness = RuntimeHarness::new(640, 480);
    let (tracker, log) = SequenceTracker::new(vec![None]);
    harness.runtime.set_depth_tracker(Box::new(tracker));

    harness.runtime.apply_depth_config(&prism_config::DepthConfig {
        preserve_depth_buffers: false,
        clear_index_override: 3,
        use_aspect_ratio_heuristics: false,
    });

    harness.present();

    let queries = log.borrow();
    assert_eq!(queries[0].0, 0);
    assert_eq!(queries[0].3, u32::MAX);
}

#[test]
fn test_depth_selection_repoints_sampler_bindings() {
    let mut harness = RuntimeHarness::new(640, 480);

    // Host-owned scene depth resource
    let scene_depth = harness
        .device_mut()
        .create_texture(&TextureDesc {
            label: "scene depth".into(),
            width: 640,
            height: 480,
            format: NativeFormat::D24UnormS8Uint,
            depth_stencil: true,
            ..Default::default()
        })
        .unwrap();

    let (tracker, _log) = SequenceTracker::new(vec![None, Some(scene_depth)]);
    harness.runtime.set_depth_tracker(Box::new(tracker));

    harness.runtime.load_effect(
        "depth_read",
        sampled_module(
            fx::TextureDecl {
                unique_name: "depth_source".into(),
                reference: fx::TextureReference::DepthBuffer,
                ..Default::default()
            },
            main_output_pass(),
        ),
    );

    // First present: no depth resource found yet, slot stays empty
    harness.clear_calls();
    harness.present();
    let first = harness.device().shader_resource_bindings()[0].to_vec();
    assert_eq!(first, vec![None]);

    // Second present: a resource was selected, the slot picks up its view
    harness.clear_calls();
    harness.present();
    let second = harness.device().shader_resource_bindings()[0].to_vec();
    assert_eq!(second.len(), 1);
    assert!(second[0].is_some());
    let view = second[0].unwrap();
    assert_eq!(harness.device().view_texture(view), Some(scene_depth));
}

#[test]
fn test_destroyed_depth_selection_unbinds_stale_view() {
    let mut harness = RuntimeHarness::new(640, 480);

    let depth_desc = TextureDesc {
        label: "scene depth".into(),
        width: 640,
        height: 480,
        format: NativeFormat::D24UnormS8Uint,
        depth_stencil: true,
        ..Default::default()
    };
    let scene_depth = harness.device_mut().create_texture(&depth_desc).unwrap();
    // A resource the host released while the tracker still remembers it
    let released_depth = harness.device_mut().create_texture(&depth_desc).unwrap();
    harness.device_mut().destroy_texture(released_depth);

    let (tracker, _log) =
        SequenceTracker::new(vec![Some(scene_depth), Some(released_depth), None]);
    harness.runtime.set_depth_tracker(Box::new(tracker));

    harness.runtime.load_effect(
        "depth_read",
        sampled_module(
            fx::TextureDecl {
                unique_name: "depth_source".into(),
                reference: fx::TextureReference::DepthBuffer,
                ..Default::default()
            },
            main_output_pass(),
        ),
    );

    harness.clear_calls();
    harness.present();
    let first = harness.device().shader_resource_bindings()[0].to_vec();
    assert_eq!(first.len(), 1);
    let live_view = first[0].expect("live selection should be bound");
    assert_eq!(harness.device().view_texture(live_view), Some(scene_depth));

    // Dead selection: the old view must not stay bound to the slot
    harness.clear_calls();
    harness.present();
    let second = harness.device().shader_resource_bindings()[0].to_vec();
    assert_eq!(second, vec![None]);

    harness.clear_calls();
    harness.present();
    let third = harness.device().shader_resource_bindings()[0].to_vec();
    assert_eq!(third, vec![None]);
}

// === Teardown ===

#[test]
fn test_reset_releases_everything_but_host_resources() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());

    harness.runtime.on_reset();

    // The back buffer is host-owned and must survive
    assert_eq!(harness.device().alive_textures(), 1);
    assert!(harness.device().texture_desc(harness.back_buffer).is_some());
    assert_eq!(harness.device().alive_views(), 0);
    assert_eq!(harness.device().alive_shaders(), 0);
    assert_eq!(harness.device().alive_buffers(), 0);
    assert_eq!(harness.device().alive_queries(), 0);
    assert_eq!(harness.device().alive_samplers(), 0);
    assert_eq!(harness.device().alive_blend_states(), 0);
    assert_eq!(harness.device().alive_depth_stencil_states(), 0);
    assert!(!harness.runtime.is_initialized());
}

#[test]
fn test_reset_is_idempotent() {
    let mut harness = RuntimeHarness::new(640, 480);
    harness.runtime.load_effect("simple", simple_module());

    harness.runtime.on_reset();
    harness.runtime.on_reset();

    assert_eq!(harness.device().alive_textures(), 1);
    assert_eq!(harness.device().alive_views(), 0);

    // Present after reset does nothing
    harness.clear_calls();
    harness.present();
    assert_eq!(harness.device().call_count(), 0);
}

#[test]
fn test_reset_without_init_is_safe() {
    let mut runtime: Runtime<MockDevice> = Runtime::new(MockDevice::new());
    runtime.on_reset();
    assert!(runtime.device().all_released());
}

// === Screenshot capture ===

#[test]
fn test_screenshot_converts_10bit_surface() {
    let mut harness =
        RuntimeHarness::with_output(2, 1, NativeFormat::Rgb10a2Unorm, 1, true);

    // Full-intensity white and half-intensity gray, both with junk alpha
    let white: u32 = 0x3FF | (0x3FF << 10) | (0x3FF << 20);
    let gray: u32 = 512 | (512 << 10) | (512 << 20);
    let mut bytes = white.to_le_bytes().to_vec();
    bytes.extend_from_slice(&gray.to_le_bytes());
    let back_buffer = harness.back_buffer;
    harness.device_mut().script_readback(back_buffer, bytes, 8);

    let pixels = harness.runtime.capture_screenshot().unwrap();
    assert_eq!(pixels, vec![255, 255, 255, 255, 128, 128, 128, 255]);
}

#[test]
fn test_screenshot_swaps_bgra_surface() {
    let mut harness = RuntimeHarness::with_output(1, 1, NativeFormat::Bgra8Unorm, 1, true);
    let back_buffer = harness.back_buffer;
    harness
        .device_mut()
        .script_readback(back_buffer, vec![10, 20, 30, 40], 4);

    let pixels = harness.runtime.capture_screenshot().unwrap();
    assert_eq!(pixels, vec![30, 20, 10, 255]);
}
