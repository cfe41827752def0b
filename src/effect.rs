//! Effect loading and compilation
//!
//! Turns one compiled effect module into native GPU state: shader programs
//! per entry point, a uniform constant buffer, and per-technique pipeline
//! state (pass state objects, resolved resource bindings, timestamp queries).
//!
//! Any failure at any step aborts the whole effect load. The effect then has
//! no renderable techniques, and whatever was partially created is released
//! by the regular unload path.

use crate::compiler::ShaderProfile;
use crate::device::{BufferId, GpuDevice, ShaderId};
use crate::formats;
use crate::runtime::Runtime;
use crate::technique::{PassState, Technique, TechniqueState};
use prism_fx as fx;
use std::collections::HashMap;

/// One loaded shader-effect unit
pub struct Effect {
    pub name: String,
    pub module: fx::EffectModule,
    /// Compiler diagnostics, including warnings from successful compiles
    pub errors: String,
    /// Disassembly listing per entry point, when the compiler produced one
    pub assembly: HashMap<String, String>,
    /// Whether the whole effect compiled and produced renderable techniques
    pub compiled: bool,

    pub(crate) shaders: HashMap<String, ShaderId>,
    pub(crate) uniform_data: Vec<u8>,
    pub(crate) constant_buffer: Option<BufferId>,
}

impl Effect {
    fn new(name: &str, module: fx::EffectModule) -> Self {
        Self {
            name: name.to_string(),
            module,
            errors: String::new(),
            assembly: HashMap::new(),
            compiled: false,
            shaders: HashMap::new(),
            uniform_data: Vec::new(),
            constant_buffer: None,
        }
    }
}

impl<D: GpuDevice> Runtime<D> {
    pub fn effect(&self, index: usize) -> Option<&Effect> {
        self.effects.get(index).and_then(Option::as_ref)
    }

    /// Number of effect table slots, including holes left by unloads
    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Load one effect module, returning its table index
    ///
    /// The index stays valid across other effects unloading. Check the
    /// effect's `compiled` flag (or the return of [`Self::init_effect`]) to
    /// see whether it produced renderable techniques.
    pub fn load_effect(&mut self, name: &str, module: fx::EffectModule) -> usize {
        let index = match self.effects.iter().position(Option::is_none) {
            Some(hole) => hole,
            None => {
                self.effects.push(None);
                self.effects.len() - 1
            }
        };

        let refs = self.reference_views();
        let mut effect = Effect::new(name, module);

        let mut textures_ok = true;
        for decl in effect.module.textures.clone() {
            if let Err(e) = self.textures.create(&mut self.device, index, &decl, &refs) {
                effect
                    .errors
                    .push_str(&format!("error: {e}\n"));
                textures_ok = false;
                break;
            }
        }

        for desc in &effect.module.techniques {
            self.techniques.push(Technique {
                name: desc.name.clone(),
                effect_index: index,
                enabled: true,
                passes: desc.passes.clone(),
                average_gpu_duration: Default::default(),
                state: None,
            });
        }

        self.effects[index] = Some(effect);

        if textures_ok {
            if self.init_effect(index) {
                log::info!("Successfully loaded effect '{name}'");
            } else {
                log::error!(
                    "Failed to load effect '{name}':\n{}",
                    self.effect(index).map(|e| e.errors.as_str()).unwrap_or("")
                );
            }
        }
        index
    }

    /// Compile an effect's shaders and build its per-technique GPU state
    ///
    /// Returns `false` when the effect produced no renderable techniques; the
    /// effect's error log then holds the diagnostics.
    pub fn init_effect(&mut self, index: usize) -> bool {
        let Some(effect) = self.effects.get_mut(index).and_then(Option::as_mut) else {
            return false;
        };

        let Some(compiler) = self.compiler.acquire() else {
            effect
                .errors
                .push_str("error: shader compiler is unavailable\n");
            return false;
        };

        let profile = ShaderProfile::for_feature_level(self.device.feature_level());

        for entry_point in &effect.module.entry_points {
            let output = compiler.compile(
                &effect.module.source,
                &entry_point.name,
                entry_point.stage,
                profile,
            );
            // Diagnostics are kept verbatim even when compilation succeeded
            effect.errors.push_str(&output.log);

            let Some(shader) = output.shader else {
                return false;
            };
            if let Some(listing) = compiler.disassemble(&shader) {
                effect.assembly.insert(entry_point.name.clone(), listing);
            }
            match self.device.create_shader(&shader) {
                Ok(id) => {
                    effect.shaders.insert(entry_point.name.clone(), id);
                }
                Err(e) => {
                    effect.errors.push_str(&format!("error: {e}\n"));
                    return false;
                }
            }
        }

        let limits = self.device.limits();
        for sampler in &effect.module.samplers {
            if sampler.binding >= limits.max_sampler_slots {
                effect.errors.push_str(&format!(
                    "error: sampler binding {} of '{}' exceeds the device limit of {}\n",
                    sampler.binding, sampler.unique_name, limits.max_sampler_slots
                ));
                return false;
            }
            if sampler.texture_binding >= limits.max_texture_slots {
                effect.errors.push_str(&format!(
                    "error: texture binding {} of '{}' exceeds the device limit of {}\n",
                    sampler.texture_binding, sampler.unique_name, limits.max_texture_slots
                ));
                return false;
            }
        }

        if !effect.module.uniform_storage.is_empty() {
            effect.uniform_data = effect.module.uniform_storage.clone();
            match self
                .device
                .create_constant_buffer(&effect.name, &effect.uniform_data)
            {
                Ok(id) => effect.constant_buffer = Some(id),
                Err(e) => {
                    effect.errors.push_str(&format!("error: {e}\n"));
                    return false;
                }
            }
        }

        // Shared binding tables all techniques of this effect start from
        let num_sampler_slots = effect
            .module
            .samplers
            .iter()
            .map(|s| s.binding + 1)
            .max()
            .unwrap_or(0)
            .max(effect.module.num_sampler_bindings) as usize;
        let num_texture_slots = effect
            .module
            .samplers
            .iter()
            .map(|s| s.texture_binding + 1)
            .max()
            .unwrap_or(0)
            .max(effect.module.num_texture_bindings) as usize;

        let mut sampler_bindings = vec![None; num_sampler_slots];
        let mut texture_bindings = vec![None; num_texture_slots];
        for sampler in &effect.module.samplers {
            let desc = formats::sampler_desc(sampler);
            match self.state_cache.get_or_create_sampler(&mut self.device, &desc) {
                Ok(id) => sampler_bindings[sampler.binding as usize] = Some(id),
                Err(e) => {
                    effect.errors.push_str(&format!("error: {e}\n"));
                    return false;
                }
            }

            let Some(texture) = self.textures.find(&sampler.texture_name) else {
                effect.errors.push_str(&format!(
                    "error: sampler '{}' references unknown texture '{}'\n",
                    sampler.unique_name, sampler.texture_name
                ));
                return false;
            };
            // Reference textures may legitimately have no view bound yet
            texture_bindings[sampler.texture_binding as usize] =
                texture.srv[usize::from(sampler.srgb)];
        }

        for technique in self
            .techniques
            .iter_mut()
            .filter(|t| t.effect_index == index)
        {
            let mut passes = Vec::with_capacity(technique.passes.len());
            for pass in &mut technique.passes {
                let Some(&vertex_shader) = effect.shaders.get(&pass.vs_entry_point) else {
                    effect.errors.push_str(&format!(
                        "error: vertex entry point '{}' was not compiled\n",
                        pass.vs_entry_point
                    ));
                    return false;
                };
                let Some(&pixel_shader) = effect.shaders.get(&pass.ps_entry_point) else {
                    effect.errors.push_str(&format!(
                        "error: pixel entry point '{}' was not compiled\n",
                        pass.ps_entry_point
                    ));
                    return false;
                };

                let blend_state = match self
                    .state_cache
                    .get_or_create_blend_state(&mut self.device, &formats::blend_desc(pass))
                {
                    Ok(id) => id,
                    Err(e) => {
                        effect.errors.push_str(&format!("error: {e}\n"));
                        return false;
                    }
                };
                let depth_stencil_state = match self.state_cache.get_or_create_depth_stencil_state(
                    &mut self.device,
                    &formats::depth_stencil_desc(pass),
                ) {
                    Ok(id) => id,
                    Err(e) => {
                        effect.errors.push_str(&format!("error: {e}\n"));
                        return false;
                    }
                };

                let mut render_targets = Vec::new();
                let mut render_target_textures = Vec::new();
                let mut generate_mip_views = Vec::new();
                if pass.targets_main_output() {
                    if pass.viewport_width == 0 {
                        pass.viewport_width = self.width;
                        pass.viewport_height = self.height;
                    }
                } else {
                    let max_targets =
                        (fx::MAX_RENDER_TARGETS as u32).min(limits.max_render_targets);
                    if pass.render_target_names.len() as u32 > max_targets {
                        effect.errors.push_str(&format!(
                            "error: a pass of technique '{}' declares {} render targets, exceeding the device limit of {}\n",
                            technique.name,
                            pass.render_target_names.len(),
                            max_targets
                        ));
                        return false;
                    }
                    for name in pass.render_target_names.clone() {
                        let view = match self.textures.get_or_create_rtv(
                            &mut self.device,
                            &name,
                            pass.srgb_write,
                        ) {
                            Ok(view) => view,
                            Err(e) => {
                                effect.errors.push_str(&format!("error: {e}\n"));
                                return false;
                            }
                        };
                        render_targets.push(Some(view));

                        if let Some(texture) = self.textures.find(&name) {
                            if let Some(storage) = texture.storage {
                                render_target_textures.push(storage);
                            }
                            if texture.decl.levels > 1
                                && let Some(srv) = texture.srv[0]
                            {
                                generate_mip_views.push(srv);
                            }
                            if pass.viewport_width == 0 {
                                pass.viewport_width = texture.decl.width;
                                pass.viewport_height = texture.decl.height;
                            }
                        }
                    }
                }

                // A texture bound as both input and target in the same pass
                // is unbound from the input side rather than left aliasing
                let mut shader_resources = texture_bindings.clone();
                for slot in &mut shader_resources {
                    if let Some(view) = *slot
                        && let Some(texture) = self.device.view_texture(view)
                        && render_target_textures.contains(&texture)
                    {
                        *slot = None;
                    }
                }

                passes.push(PassState {
                    vertex_shader,
                    pixel_shader,
                    blend_state,
                    depth_stencil_state,
                    render_targets,
                    generate_mip_views,
                    shader_resources,
                });
            }

            // Queries last so a pass failure above leaks nothing here
            let timestamp_disjoint = match self.device.create_disjoint_query() {
                Ok(id) => id,
                Err(e) => {
                    effect.errors.push_str(&format!("error: {e}\n"));
                    return false;
                }
            };
            let (timestamp_begin, timestamp_end) = match (
                self.device.create_timestamp_query(),
                self.device.create_timestamp_query(),
            ) {
                (Ok(begin), Ok(end)) => (begin, end),
                (begin, end) => {
                    self.device.destroy_query(timestamp_disjoint);
                    if let Ok(id) = begin {
                        self.device.destroy_query(id);
                    }
                    if let Ok(id) = end {
                        self.device.destroy_query(id);
                    }
                    effect
                        .errors
                        .push_str("error: failed to create timestamp queries\n");
                    return false;
                }
            };

            technique.state = Some(TechniqueState {
                query_in_flight: false,
                timestamp_disjoint,
                timestamp_begin,
                timestamp_end,
                sampler_bindings: sampler_bindings.clone(),
                texture_bindings: texture_bindings.clone(),
                passes,
            });
        }

        effect.compiled = true;
        true
    }

    /// Unload one effect, leaving a hole in the effect table
    pub fn unload_effect(&mut self, index: usize) {
        let Some(effect) = self.effects.get_mut(index).and_then(Option::take) else {
            return;
        };
        log::info!("Unloading effect '{}'", effect.name);

        let mut removed_states = Vec::new();
        self.techniques.retain_mut(|technique| {
            if technique.effect_index == index {
                if let Some(state) = technique.state.take() {
                    removed_states.push(state);
                }
                false
            } else {
                true
            }
        });
        for state in removed_states {
            self.device.destroy_query(state.timestamp_disjoint);
            self.device.destroy_query(state.timestamp_begin);
            self.device.destroy_query(state.timestamp_end);
        }

        let mut effect = effect;
        for (_, shader) in effect.shaders.drain() {
            self.device.destroy_shader(shader);
        }
        if let Some(buffer) = effect.constant_buffer.take() {
            self.device.destroy_buffer(buffer);
        }
        self.textures.destroy_effect(&mut self.device, index);
    }

    /// Unload every effect and release the shared state object cache
    pub fn unload_effects(&mut self) {
        for index in 0..self.effects.len() {
            self.unload_effect(index);
        }
        self.effects.clear();
        self.techniques.clear();
        self.textures.clear(&mut self.device);
        self.state_cache.clear(&mut self.device);
    }

    /// Overwrite part of an effect's uniform block and push it to the GPU
    pub fn set_uniform_data(&mut self, index: usize, offset: usize, data: &[u8]) {
        let Some(effect) = self.effects.get_mut(index).and_then(Option::as_mut) else {
            return;
        };
        let Some(slice) = effect
            .uniform_data
            .get_mut(offset..offset + data.len())
        else {
            log::warn!(
                "Uniform write of {} bytes at offset {offset} exceeds the {}-byte block of '{}'",
                data.len(),
                effect.uniform_data.len(),
                effect.name
            );
            return;
        };
        slice.copy_from_slice(data);
        if let Some(buffer) = effect.constant_buffer {
            self.device.update_constant_buffer(buffer, &effect.uniform_data);
        }
    }
}
