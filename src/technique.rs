//! Technique execution
//!
//! Per-frame rendering of one technique: non-blocking timestamp collection,
//! deterministic per-pass bind order, pre-pass back-buffer snapshotting,
//! render-target/shader-resource unbinding between passes, and mip-chain
//! regeneration for multi-level targets.

use crate::device::{
    BlendStateId, DepthStencilStateId, GpuDevice, QueryId, SamplerId, ShaderId, ViewId,
};
use crate::runtime::Runtime;
use prism_fx as fx;

const AVERAGE_WINDOW: usize = 60;

/// Rolling average over the last [`AVERAGE_WINDOW`] samples
#[derive(Debug, Clone, Default)]
pub struct MovingAverage {
    samples: Vec<u64>,
    next: usize,
    sum: u64,
}

impl MovingAverage {
    pub fn append(&mut self, value: u64) {
        if self.samples.len() < AVERAGE_WINDOW {
            self.samples.push(value);
        } else {
            self.sum -= self.samples[self.next];
            self.samples[self.next] = value;
            self.next = (self.next + 1) % AVERAGE_WINDOW;
        }
        self.sum += value;
    }

    /// Average of the recorded samples, or 0 before the first sample
    pub fn average(&self) -> u64 {
        if self.samples.is_empty() {
            0
        } else {
            self.sum / self.samples.len() as u64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.next = 0;
        self.sum = 0;
    }
}

/// Pipeline state of one pass, resolved at effect load
pub(crate) struct PassState {
    pub vertex_shader: ShaderId,
    pub pixel_shader: ShaderId,
    pub blend_state: BlendStateId,
    pub depth_stencil_state: DepthStencilStateId,
    /// Named render targets; empty means the pass draws to the main output
    pub render_targets: Vec<Option<ViewId>>,
    /// Read-views of multi-level render targets needing mip regeneration
    pub generate_mip_views: Vec<ViewId>,
    /// Texture bindings with same-pass render-target aliases removed
    pub shader_resources: Vec<Option<ViewId>>,
}

/// GPU-side state of a technique, present only while its effect is compiled
pub(crate) struct TechniqueState {
    /// A timestamp pair has been issued and not yet collected
    pub query_in_flight: bool,
    pub timestamp_disjoint: QueryId,
    pub timestamp_begin: QueryId,
    pub timestamp_end: QueryId,
    pub sampler_bindings: Vec<Option<SamplerId>>,
    /// Resolved read-views by texture binding slot
    pub texture_bindings: Vec<Option<ViewId>>,
    pub passes: Vec<PassState>,
}

/// An ordered pass sequence, independently toggle-able at runtime
pub struct Technique {
    pub name: String,
    /// Slot of the owning effect in the effect table
    pub effect_index: usize,
    pub enabled: bool,
    /// Pass descriptors, with viewport dimensions defaulted at load
    pub(crate) passes: Vec<fx::PassDesc>,
    pub average_gpu_duration: MovingAverage,
    pub(crate) state: Option<TechniqueState>,
}

impl Technique {
    /// Whether GPU-side state exists; techniques without it are skipped
    pub fn is_renderable(&self) -> bool {
        self.state.is_some()
    }
}

impl<D: GpuDevice> Runtime<D> {
    /// Render every enabled technique in load order
    pub(crate) fn render_effects(&mut self) {
        for index in 0..self.techniques.len() {
            if self.techniques[index].enabled && self.techniques[index].is_renderable() {
                self.render_technique(index);
            }
        }
    }

    fn render_technique(&mut self, index: usize) {
        let technique = &mut self.techniques[index];
        let Some(state) = technique.state.as_mut() else {
            return;
        };

        // Collect the previous frame pair without stalling; a disjoint
        // result invalidates the sample and it is dropped, not retried
        if state.query_in_flight
            && let (Some(disjoint), Some(begin), Some(end)) = (
                self.device.poll_disjoint(state.timestamp_disjoint),
                self.device.poll_timestamp(state.timestamp_begin),
                self.device.poll_timestamp(state.timestamp_end),
            )
        {
            if !disjoint.disjoint && disjoint.frequency > 0 {
                let elapsed =
                    (end.wrapping_sub(begin) as u128 * 1_000_000_000 / disjoint.frequency as u128)
                        as u64;
                technique.average_gpu_duration.append(elapsed);
            }
            state.query_in_flight = false;
        }

        let issue_queries = !state.query_in_flight;
        if issue_queries {
            self.device.begin_disjoint_query(state.timestamp_disjoint);
            self.device.write_timestamp(state.timestamp_begin);
        }

        let constant_buffer = self.effects[technique.effect_index]
            .as_ref()
            .and_then(|effect| effect.constant_buffer);
        self.device.set_constant_buffer(constant_buffer);
        self.device.set_samplers(&state.sampler_bindings);

        let mut stencil_cleared = false;
        for (pass, pass_state) in technique.passes.iter().zip(&state.passes) {
            // Snapshot so the pass can read the exact pre-pass output
            if let (Some(resolved), Some(snapshot)) =
                (self.back_buffer_resolved, self.back_buffer_texture)
            {
                self.device.copy_texture(resolved, snapshot);
            }

            self.device
                .set_shaders(Some(pass_state.vertex_shader), Some(pass_state.pixel_shader));
            self.device.set_blend_state(Some(pass_state.blend_state));
            self.device.set_depth_stencil_state(
                Some(pass_state.depth_stencil_state),
                pass.stencil_reference,
            );
            self.device
                .set_shader_resources(&pass_state.shader_resources);

            if pass.targets_main_output() {
                let target = self.back_buffer_rtv[usize::from(pass.srgb_write)];
                // The shared stencil surface only joins full-viewport passes
                let depth_stencil = if pass.stencil_enable
                    && pass.viewport_width == self.width
                    && pass.viewport_height == self.height
                {
                    if !stencil_cleared
                        && let Some(view) = self.effect_stencil_view
                    {
                        self.device.clear_stencil(view, 0);
                        stencil_cleared = true;
                    }
                    self.effect_stencil_view
                } else {
                    None
                };
                self.device.set_render_targets(&[target], depth_stencil);
                if pass.clear_render_targets
                    && let Some(view) = target
                {
                    self.device.clear_render_target(view, [0.0, 0.0, 0.0, 0.0]);
                }
            } else {
                self.device
                    .set_render_targets(&pass_state.render_targets, None);
                if pass.clear_render_targets {
                    for view in pass_state.render_targets.iter().flatten() {
                        self.device.clear_render_target(*view, [0.0, 0.0, 0.0, 0.0]);
                    }
                }
            }

            self.device
                .set_viewport(pass.viewport_width, pass.viewport_height);
            self.device.draw(pass.num_vertices);
            self.frame_stats.drawcalls += 1;
            self.frame_stats.vertices += pass.num_vertices;

            // Unbind so read/write hazards cannot carry into the next pass
            self.device.set_render_targets(&[], None);
            self.device
                .set_shader_resources(&vec![None; pass_state.shader_resources.len()]);

            for view in &pass_state.generate_mip_views {
                self.device.generate_mips(*view);
            }
        }

        if issue_queries {
            self.device.write_timestamp(state.timestamp_end);
            self.device.end_disjoint_query(state.timestamp_disjoint);
        }
        state.query_in_flight = true;
    }
}
