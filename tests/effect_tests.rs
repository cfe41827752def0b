//! Effect lifecycle functional tests
//!
//! Exercises effect loading, compilation failure handling, resource binding
//! resolution and unloading against the mock device.

mod common;

use common::{RuntimeHarness, main_output_pass, sampled_module, simple_module};
use prism::mock::DeviceCall;
use prism_fx as fx;

// === Loading and compilation ===

#[test]
fn test_load_effect_compiles_and_registers_technique() {
    let mut harness = RuntimeHarness::new(640, 480);

    let index = harness.runtime.load_effect("simple", simple_module());

    let effect = harness.runtime.effect(index).unwrap();
    assert!(effect.compiled);
    assert!(effect.errors.is_empty());
    assert!(effect.assembly.contains_key("ps_main"));

    assert_eq!(harness.runtime.techniques().len(), 1);
    assert_eq!(harness.runtime.techniques()[0].name, "Simple");
    assert!(harness.runtime.techniques()[0].enabled);
    assert!(harness.runtime.techniques()[0].is_renderable());
}

#[test]
fn test_invalid_source_fails_with_diagnostics() {
    let mut harness = RuntimeHarness::new(640, 480);

    let module = fx::EffectModule {
        source: "fn broken {".into(),
        entry_points: common::entry_points(),
        techniques: vec![fx::TechniqueDesc {
            name: "Broken".into(),
            passes: vec![main_output_pass()],
        }],
        ..Default::default()
    };
    let index = harness.runtime.load_effect("broken", module);

    let effect = harness.runtime.effect(index).unwrap();
    assert!(!effect.compiled);
    assert!(!effect.errors.is_empty());
    assert!(!harness.runtime.techniques()[0].is_renderable());

    // Non-renderable techniques never draw
    harness.clear_calls();
    harness.present();
    assert_eq!(harness.device().draw_count(), 0);
}

#[test]
fn test_missing_entry_point_fails() {
    let mut harness = RuntimeHarness::new(640, 480);

    let mut module = simple_module();
    module.entry_points.push(fx::EntryPoint {
        name: "ps_missing".into(),
        stage: fx::ShaderStage::Pixel,
    });
    let index = harness.runtime.load_effect("missing", module);

    let effect = harness.runtime.effect(index).unwrap();
    assert!(!effect.compiled);
    assert!(effect.errors.contains("ps_missing"));
}

#[test]
fn test_sampler_with_unknown_texture_fails() {
    let mut harness = RuntimeHarness::new(640, 480);

    let mut module = sampled_module(
        fx::TextureDecl {
            unique_name: "tex_input".into(),
            width: 64,
            height: 64,
            ..Default::default()
        },
        main_output_pass(),
    );
    module.samplers[0].texture_name = "tex_nonexistent".into();
    let index = harness.runtime.load_effect("dangling", module);

    let effect = harness.runtime.effect(index).unwrap();
    assert!(!effect.compiled);
    assert!(effect.errors.contains("tex_nonexistent"));
}

#[test]
fn test_pass_with_too_many_render_targets_fails() {
    let mut harness = RuntimeHarness::new(640, 480);

    // One target over the device's limit of 8
    let mut module = simple_module();
    module.techniques[0].passes[0].render_target_names =
        (0..9).map(|i| format!("tex_target_{i}")).collect();
    let index = harness.runtime.load_effect("overcommitted", module);

    let effect = harness.runtime.effect(index).unwrap();
    assert!(!effect.compiled);
    assert!(effect.errors.contains("render targets"));
    assert!(effect.errors.contains("Simple"));

    harness.clear_calls();
    harness.present();
    assert_eq!(harness.device().draw_count(), 0);
}

// === Resource binding ===

#[test]
fn test_intermediate_target_pass_uses_texture_viewport() {
    let mut harness = RuntimeHarness::new(640, 480);

    let module = sampled_module(
        fx::TextureDecl {
            unique_name: "tex_half".into(),
            width: 320,
            height: 240,
            ..Default::default()
        },
        fx::PassDesc {
            render_target_names: vec!["tex_half".into()],
            ..main_output_pass()
        },
    );
    harness.runtime.load_effect("downsample", module);
    harness.clear_calls();

    harness.present();

    assert!(harness.device().calls.iter().any(|c| matches!(
        c,
        DeviceCall::SetViewport {
            width: 320,
            height: 240
        }
    )));
}

#[test]
fn test_same_pass_input_and_target_unbinds_input() {
    let mut harness = RuntimeHarness::new(640, 480);

    // The pass both samples tex_feedback and renders into it
    let module = sampled_module(
        fx::TextureDecl {
            unique_name: "tex_feedback".into(),
            width: 64,
            height: 64,
            ..Default::default()
        },
        fx::PassDesc {
            render_target_names: vec!["tex_feedback".into()],
            ..main_output_pass()
        },
    );
    harness.runtime.load_effect("feedback", module);
    harness.clear_calls();

    harness.present();

    let bindings = harness.device().shader_resource_bindings();
    // Bind before the draw has the aliasing slot emptied
    assert_eq!(bindings[0], [None].as_slice());
}

#[test]
fn test_separate_input_texture_stays_bound() {
    let mut harness = RuntimeHarness::new(640, 480);

    let module = sampled_module(
        fx::TextureDecl {
            unique_name: "tex_lut".into(),
            width: 16,
            height: 16,
            ..Default::default()
        },
        main_output_pass(),
    );
    harness.runtime.load_effect("lut", module);
    harness.clear_calls();

    harness.present();

    let bindings = harness.device().shader_resource_bindings();
    assert_eq!(bindings[0].len(), 1);
    assert!(bindings[0][0].is_some());
    // Unbound again after the draw
    assert_eq!(bindings[1], [None].as_slice());
}

#[test]
fn test_clear_and_mip_regeneration_for_render_target() {
    let mut harness = RuntimeHarness::new(640, 480);

    let module = sampled_module(
        fx::TextureDecl {
            unique_name: "tex_mips".into(),
            width: 64,
            height: 64,
            levels: 4,
            ..Default::default()
        },
        fx::PassDesc {
            render_target_names: vec!["tex_mips".into()],
            clear_render_targets: true,
            ..main_output_pass()
        },
    );
    harness.runtime.load_effect("mips", module);
    harness.clear_calls();

    harness.present();

    assert!(harness.device().clear_count() >= 1);
    assert_eq!(harness.device().mip_generation_count(), 1);
}

// === Uniforms ===

#[test]
fn test_uniform_update_reaches_the_device() {
    let mut harness = RuntimeHarness::new(640, 480);

    let module = fx::EffectModule {
        source: common::UNIFORM_WGSL.into(),
        entry_points: common::entry_points(),
        uniform_storage: vec![0u8; 16],
        techniques: vec![fx::TechniqueDesc {
            name: "Uniforms".into(),
            passes: vec![main_output_pass()],
        }],
        ..Default::default()
    };
    let index = harness.runtime.load_effect("uniforms", module);
    assert!(harness.runtime.effect(index).unwrap().compiled);
    harness.clear_calls();

    harness.runtime.set_uniform_data(index, 4, &1.0f32.to_le_bytes());
    assert!(harness
        .device()
        .calls
        .iter()
        .any(|c| matches!(c, DeviceCall::UpdateConstantBuffer { bytes: 16, .. })));

    // Out-of-bounds writes are dropped without touching the device
    harness.clear_calls();
    harness.runtime.set_uniform_data(index, 12, &[0u8; 8]);
    assert_eq!(harness.device().call_count(), 0);
}

// === Unloading ===

#[test]
fn test_unload_leaves_hole_that_next_load_fills() {
    let mut harness = RuntimeHarness::new(640, 480);

    let first = harness.runtime.load_effect("first", simple_module());
    let second = harness.runtime.load_effect("second", simple_module());
    assert_eq!((first, second), (0, 1));
    assert_eq!(harness.runtime.techniques().len(), 2);

    harness.runtime.unload_effect(first);
    assert!(harness.runtime.effect(first).is_none());
    assert!(harness.runtime.effect(second).is_some());
    assert_eq!(harness.runtime.effect_count(), 2);
    assert_eq!(harness.runtime.techniques().len(), 1);

    let third = harness.runtime.load_effect("third", simple_module());
    assert_eq!(third, first);
    assert_eq!(harness.runtime.techniques().len(), 2);
}

#[test]
fn test_unload_releases_per_effect_resources() {
    let mut harness = RuntimeHarness::new(640, 480);

    let baseline_shaders = harness.device().alive_shaders();
    let index = harness.runtime.load_effect("simple", simple_module());
    assert!(harness.device().alive_shaders() > baseline_shaders);
    assert_eq!(harness.device().alive_queries(), 3);

    harness.runtime.unload_effect(index);

    assert_eq!(harness.device().alive_shaders(), baseline_shaders);
    assert_eq!(harness.device().alive_queries(), 0);
    assert_eq!(harness.device().alive_buffers(), 0);
}

#[test]
fn test_unload_all_releases_cached_state_objects() {
    let mut harness = RuntimeHarness::new(640, 480);

    harness.runtime.load_effect("a", simple_module());
    harness.runtime.load_effect("b", simple_module());
    assert!(harness.device().alive_blend_states() > 0);
    assert!(harness.device().alive_depth_stencil_states() > 0);

    harness.runtime.unload_effects();

    assert_eq!(harness.runtime.effect_count(), 0);
    assert!(harness.runtime.techniques().is_empty());
    assert_eq!(harness.device().alive_blend_states(), 0);
    assert_eq!(harness.device().alive_depth_stencil_states(), 0);
}

#[test]
fn test_unloading_one_effect_keeps_others_renderable() {
    let mut harness = RuntimeHarness::new(640, 480);

    let first = harness.runtime.load_effect("first", simple_module());
    harness.runtime.load_effect("second", simple_module());

    harness.runtime.unload_effect(first);
    harness.clear_calls();
    harness.present();

    assert_eq!(harness.device().draw_count(), 1);
}
