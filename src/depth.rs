//! Depth source selection
//!
//! Each present, an external heuristic tracker is asked for the best
//! candidate scene depth resource. When the selection changes, a fresh
//! read-view is created and every texture and technique-pass binding that
//! referenced the previous depth view is repointed in place, without
//! recompiling any effect.

use crate::device::{GpuDevice, TextureId, ViewDesc, ViewKind};
use crate::runtime::Runtime;
use prism_fx::TextureReference;

/// Per-resource draw statistics reported by the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthStats {
    pub drawcalls: u32,
    pub vertices: u32,
}

/// External heuristic that watches depth-stencil usage during the frame
pub trait DepthTracker {
    /// Best-guess scene depth resource for the given output dimensions
    ///
    /// `filter_width` is 0 when aspect-ratio filtering is disabled.
    /// `preserve_clear_index` selects which clear's pre-clear contents to
    /// preserve; the maximum representable index means preservation is off.
    fn find_best(
        &mut self,
        filter_width: u32,
        height: u32,
        override_handle: Option<TextureId>,
        preserve_clear_index: u32,
    ) -> Option<TextureId>;

    /// Candidate resources and their usage counters, for diagnostics only
    fn counters(&self) -> Vec<(TextureId, DepthStats)>;
}

impl<D: GpuDevice> Runtime<D> {
    /// Usage counters of the current depth candidates, if a tracker is set
    pub fn depth_counters(&self) -> Vec<(TextureId, DepthStats)> {
        self.depth_tracker
            .as_ref()
            .map(|tracker| tracker.counters())
            .unwrap_or_default()
    }

    pub(crate) fn update_depth_texture(&mut self) {
        let Some(tracker) = self.depth_tracker.as_mut() else {
            return;
        };

        let filter_width = if self.filter_aspect_ratio { self.width } else { 0 };
        let clear_index = if self.preserve_depth_buffers {
            self.depth_clear_index_override
        } else {
            u32::MAX
        };
        let best = tracker.find_best(
            filter_width,
            self.height,
            self.depth_texture_override,
            clear_index,
        );
        if best == self.depth_texture {
            return;
        }

        if let Some(old) = self.depth_texture_srv.take() {
            self.device.destroy_view(old);
        }
        self.depth_texture = best;
        self.depth_texture_srv = match best {
            Some(texture) => match self.device.texture_desc(texture) {
                Some(desc) => match self.device.create_view(
                    texture,
                    &ViewDesc {
                        kind: ViewKind::ShaderResource,
                        format: desc.format,
                        mip_levels: 1,
                    },
                ) {
                    Ok(view) => Some(view),
                    Err(e) => {
                        log::error!("Failed to create depth read view: {e}");
                        None
                    }
                },
                // The selection can outlive the resource it names; drop it
                // and fall through so stale bindings are cleared below
                None => {
                    log::warn!("Selected depth resource is not a live texture");
                    self.depth_texture = None;
                    None
                }
            },
            None => None,
        };

        self.rebind_depth_views();
    }

    /// Repoint everything that reads the depth pseudo-texture to its current
    /// view, leaving all other bindings untouched
    fn rebind_depth_views(&mut self) {
        let new_view = self.depth_texture_srv;

        for texture in self.textures.iter_mut() {
            if texture.decl.reference == TextureReference::DepthBuffer {
                texture.srv = [new_view, new_view];
            }
        }

        // Slots are re-resolved per sampler declaration rather than matched
        // against the old handle, so bindings that were empty (no depth
        // resource yet) pick up the new view too
        for technique in &mut self.techniques {
            let Some(state) = technique.state.as_mut() else {
                continue;
            };
            let Some(effect) = self
                .effects
                .get(technique.effect_index)
                .and_then(Option::as_ref)
            else {
                continue;
            };
            for sampler in &effect.module.samplers {
                let is_depth = self
                    .textures
                    .find(&sampler.texture_name)
                    .is_some_and(|t| t.decl.reference == TextureReference::DepthBuffer);
                if !is_depth {
                    continue;
                }
                let slot = sampler.texture_binding as usize;
                if let Some(binding) = state.texture_bindings.get_mut(slot) {
                    *binding = new_view;
                }
                // Depth is never a render target, so no aliasing filter applies
                for pass in &mut state.passes {
                    if let Some(binding) = pass.shader_resources.get_mut(slot) {
                        *binding = new_view;
                    }
                }
            }
        }
    }
}
