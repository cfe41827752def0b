//! State object cache
//!
//! Deduplicates immutable GPU state objects (samplers, blend states,
//! depth-stencil states) by their full descriptor value. Structurally equal
//! descriptors always resolve to the same object; entries are owned
//! collectively and released en masse when all effects unload, since
//! samplers are commonly shared across effects.

use crate::device::{
    BlendDesc, BlendStateId, DepthStencilDesc, DepthStencilStateId, DeviceError, GpuDevice,
    SamplerDesc, SamplerId,
};
use std::collections::HashMap;

#[derive(Default)]
pub struct StateObjectCache {
    samplers: HashMap<SamplerDesc, SamplerId>,
    blend_states: HashMap<BlendDesc, BlendStateId>,
    depth_stencil_states: HashMap<DepthStencilDesc, DepthStencilStateId>,
}

impl StateObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_sampler(
        &mut self,
        device: &mut dyn GpuDevice,
        desc: &SamplerDesc,
    ) -> Result<SamplerId, DeviceError> {
        if let Some(&id) = self.samplers.get(desc) {
            return Ok(id);
        }
        let id = device.create_sampler(desc)?;
        self.samplers.insert(*desc, id);
        Ok(id)
    }

    pub fn get_or_create_blend_state(
        &mut self,
        device: &mut dyn GpuDevice,
        desc: &BlendDesc,
    ) -> Result<BlendStateId, DeviceError> {
        if let Some(&id) = self.blend_states.get(desc) {
            return Ok(id);
        }
        let id = device.create_blend_state(desc)?;
        self.blend_states.insert(*desc, id);
        Ok(id)
    }

    pub fn get_or_create_depth_stencil_state(
        &mut self,
        device: &mut dyn GpuDevice,
        desc: &DepthStencilDesc,
    ) -> Result<DepthStencilStateId, DeviceError> {
        if let Some(&id) = self.depth_stencil_states.get(desc) {
            return Ok(id);
        }
        let id = device.create_depth_stencil_state(desc)?;
        self.depth_stencil_states.insert(*desc, id);
        Ok(id)
    }

    /// Release every cached object. Called when the whole effect set unloads.
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for (_, id) in self.samplers.drain() {
            device.destroy_sampler(id);
        }
        for (_, id) in self.blend_states.drain() {
            device.destroy_blend_state(id);
        }
        for (_, id) in self.depth_stencil_states.drain() {
            device.destroy_depth_stencil_state(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
            && self.blend_states.is_empty()
            && self.depth_stencil_states.is_empty()
    }
}
