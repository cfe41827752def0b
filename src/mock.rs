//! Mock device for testing
//!
//! Provides a MockDevice that implements [`GpuDevice`] and records all
//! binding and draw calls for test assertions, without requiring a GPU
//! context. Resource handles are tracked for liveness so tests can assert
//! that creation and destruction stay paired. Query results and texture
//! readbacks are scriptable.

use crate::compiler::CompiledShader;
use crate::device::*;
use std::collections::HashMap;

/// Record of a device call for test inspection
#[derive(Debug, Clone)]
pub enum DeviceCall {
    SetShaders {
        vs: Option<ShaderId>,
        ps: Option<ShaderId>,
    },
    SetBlendState(Option<BlendStateId>),
    SetDepthStencilState {
        state: Option<DepthStencilStateId>,
        stencil_ref: u32,
    },
    SetSamplers(Vec<Option<SamplerId>>),
    SetShaderResources(Vec<Option<ViewId>>),
    SetRenderTargets {
        targets: Vec<Option<ViewId>>,
        depth_stencil: Option<ViewId>,
    },
    SetViewport {
        width: u32,
        height: u32,
    },
    SetConstantBuffer(Option<BufferId>),
    ClearRenderTarget {
        view: ViewId,
        color: [f32; 4],
    },
    ClearStencil {
        view: ViewId,
        value: u8,
    },
    Draw(u32),
    UploadTexture {
        id: TextureId,
        bytes: usize,
        row_pitch: u32,
    },
    UpdateConstantBuffer {
        id: BufferId,
        bytes: usize,
    },
    GenerateMips(ViewId),
    CopyTexture {
        src: TextureId,
        dst: TextureId,
    },
    ResolveTexture {
        src: TextureId,
        dst: TextureId,
    },
    BeginDisjointQuery(QueryId),
    EndDisjointQuery(QueryId),
    WriteTimestamp(QueryId),
    DestroyView(ViewId),
    CaptureState,
    RestoreState,
}

/// A mock device that records all calls for testing
///
/// Creation methods hand out sequential handles and track them for
/// liveness; destruction removes them again. Set `fail_*` flags to make
/// the next matching creation call fail, for exercising cleanup paths.
#[derive(Default)]
pub struct MockDevice {
    /// All binding, draw and transfer calls made to this device
    pub calls: Vec<DeviceCall>,
    /// Fail the next `create_texture` call
    pub fail_texture_creation: bool,
    /// Fail the next `create_view` call
    pub fail_view_creation: bool,
    /// Fail the next `create_shader` call
    pub fail_shader_creation: bool,
    pub feature_level: Option<FeatureLevel>,

    next_id: u64,
    textures: HashMap<TextureId, TextureDesc>,
    views: HashMap<ViewId, (TextureId, ViewDesc)>,
    samplers: HashMap<SamplerId, SamplerDesc>,
    blend_states: HashMap<BlendStateId, BlendDesc>,
    depth_stencil_states: HashMap<DepthStencilStateId, DepthStencilDesc>,
    shaders: HashMap<ShaderId, String>,
    buffers: HashMap<BufferId, usize>,
    queries: HashMap<QueryId, ()>,
    scripted_timestamps: HashMap<QueryId, u64>,
    scripted_disjoint: HashMap<QueryId, DisjointResult>,
    scripted_readback: HashMap<TextureId, TextureData>,
}

impl MockDevice {
    /// Create a new mock device
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all recorded calls
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Get the number of recorded calls
    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // === Scripting helpers ===

    /// Make `poll_timestamp` for this query return the given tick value
    pub fn script_timestamp(&mut self, id: QueryId, ticks: u64) {
        self.scripted_timestamps.insert(id, ticks);
    }

    /// Make `poll_disjoint` for this query return the given result
    pub fn script_disjoint(&mut self, id: QueryId, disjoint: bool, frequency: u64) {
        self.scripted_disjoint
            .insert(id, DisjointResult { disjoint, frequency });
    }

    /// Make `read_texture` for this texture return the given data
    pub fn script_readback(&mut self, id: TextureId, data: Vec<u8>, row_pitch: usize) {
        self.scripted_readback
            .insert(id, TextureData { data, row_pitch });
    }

    // === Assertion helpers ===

    pub fn alive_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn alive_views(&self) -> usize {
        self.views.len()
    }

    pub fn alive_samplers(&self) -> usize {
        self.samplers.len()
    }

    pub fn alive_blend_states(&self) -> usize {
        self.blend_states.len()
    }

    pub fn alive_depth_stencil_states(&self) -> usize {
        self.depth_stencil_states.len()
    }

    pub fn alive_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn alive_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn alive_queries(&self) -> usize {
        self.queries.len()
    }

    /// True when no resources of any kind remain live
    pub fn all_released(&self) -> bool {
        self.textures.is_empty()
            && self.views.is_empty()
            && self.samplers.is_empty()
            && self.blend_states.is_empty()
            && self.depth_stencil_states.is_empty()
            && self.shaders.is_empty()
            && self.buffers.is_empty()
            && self.queries.is_empty()
    }

    /// Views passed to `destroy_view`, in order
    pub fn calls_destroy_view(&self) -> Vec<ViewId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::DestroyView(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn draw_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::Draw(_)))
            .count()
    }

    pub fn clear_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::ClearRenderTarget { .. }))
            .count()
    }

    pub fn stencil_clear_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::ClearStencil { .. }))
            .count()
    }

    pub fn mip_generation_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::GenerateMips(_)))
            .count()
    }

    pub fn capture_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::CaptureState))
            .count()
    }

    pub fn restore_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::RestoreState))
            .count()
    }

    pub fn timestamp_write_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::WriteTimestamp(_)))
            .count()
    }

    /// The render targets bound by the most recent `set_render_targets` call
    pub fn last_render_targets(&self) -> Option<&[Option<ViewId>]> {
        self.calls.iter().rev().find_map(|call| {
            if let DeviceCall::SetRenderTargets { targets, .. } = call {
                Some(targets.as_slice())
            } else {
                None
            }
        })
    }

    /// The views bound by the most recent `set_shader_resources` call
    pub fn last_shader_resources(&self) -> Option<&[Option<ViewId>]> {
        self.calls.iter().rev().find_map(|call| {
            if let DeviceCall::SetShaderResources(views) = call {
                Some(views.as_slice())
            } else {
                None
            }
        })
    }

    /// All shader-resource binding calls, in order
    pub fn shader_resource_bindings(&self) -> Vec<&[Option<ViewId>]> {
        self.calls
            .iter()
            .filter_map(|call| {
                if let DeviceCall::SetShaderResources(views) = call {
                    Some(views.as_slice())
                } else {
                    None
                }
            })
            .collect()
    }

    /// All render-target binding calls, in order
    pub fn render_target_bindings(&self) -> Vec<&[Option<ViewId>]> {
        self.calls
            .iter()
            .filter_map(|call| {
                if let DeviceCall::SetRenderTargets { targets, .. } = call {
                    Some(targets.as_slice())
                } else {
                    None
                }
            })
            .collect()
    }

    fn bytes_per_pixel(format: NativeFormat) -> usize {
        match format {
            NativeFormat::R8Unorm => 1,
            NativeFormat::R16Float | NativeFormat::Rg8Unorm => 2,
            NativeFormat::R32Float
            | NativeFormat::Rg16Unorm
            | NativeFormat::Rg16Float
            | NativeFormat::Rgba8Unorm
            | NativeFormat::Rgba8UnormSrgb
            | NativeFormat::Bgra8Unorm
            | NativeFormat::Bgra8UnormSrgb
            | NativeFormat::Rgb10a2Unorm
            | NativeFormat::D24UnormS8Uint => 4,
            NativeFormat::Rg32Float | NativeFormat::Rgba16Unorm | NativeFormat::Rgba16Float => 8,
            NativeFormat::Rgba32Float => 16,
        }
    }
}

impl GpuDevice for MockDevice {
    fn feature_level(&self) -> FeatureLevel {
        self.feature_level.unwrap_or(FeatureLevel::Core)
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits::default()
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        if std::mem::take(&mut self.fail_texture_creation) {
            return Err(DeviceError::TextureCreation {
                name: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                levels: desc.mip_levels,
                format: desc.format,
            });
        }
        let id = TextureId(self.next());
        self.textures.insert(id, desc.clone());
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id).cloned()
    }

    fn create_view(&mut self, texture: TextureId, desc: &ViewDesc) -> Result<ViewId, DeviceError> {
        if std::mem::take(&mut self.fail_view_creation) {
            return Err(DeviceError::ViewCreation {
                name: self
                    .textures
                    .get(&texture)
                    .map(|t| t.label.clone())
                    .unwrap_or_default(),
                kind: desc.kind,
                format: desc.format,
            });
        }
        let id = ViewId(self.next());
        self.views.insert(id, (texture, *desc));
        Ok(id)
    }

    fn destroy_view(&mut self, id: ViewId) {
        self.views.remove(&id);
        self.calls.push(DeviceCall::DestroyView(id));
    }

    fn view_texture(&self, id: ViewId) -> Option<TextureId> {
        self.views.get(&id).map(|(texture, _)| *texture)
    }

    fn view_desc(&self, id: ViewId) -> Option<ViewDesc> {
        self.views.get(&id).map(|(_, desc)| *desc)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        let id = SamplerId(self.next());
        self.samplers.insert(id, *desc);
        Ok(id)
    }

    fn destroy_sampler(&mut self, id: SamplerId) {
        self.samplers.remove(&id);
    }

    fn create_blend_state(&mut self, desc: &BlendDesc) -> Result<BlendStateId, DeviceError> {
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
        if std::mem::take(&mut self.fail_shader_creation) {
            return Err(DeviceError::ShaderCreation(
                shader.entry_point.clone(),
                "mock failure".to_string(),
            ));
        }
        let id = ShaderId(self.next());
        self.shaders.insert(id, shader.entry_point.clone());
        Ok(id)
    }

    fn destroy_shader(&mut self, id: ShaderId) {
        self.shaders.remove(&id);
    }

    fn create_constant_buffer(
        &mut self,
        _label: &str,
        data: &[u8],
    ) -> Result<BufferId, DeviceError> {
        let id = BufferId(self.next());
        self.buffers.insert(id, data.len());
        Ok(id)
    }

    fn update_constant_buffer(&mut self, id: BufferId, data: &[u8]) {
        self.calls.push(DeviceCall::UpdateConstantBuffer {
            id,
            bytes: data.len(),
        });
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn upload_texture(&mut self, id: TextureId, data: &[u8], row_pitch: u32) {
        self.calls.push(DeviceCall::UploadTexture {
            id,
            bytes: data.len(),
            row_pitch,
        });
    }

    fn generate_mips(&mut self, view: ViewId) {
        self.calls.push(DeviceCall::GenerateMips(view));
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) {
        self.calls.push(DeviceCall::CopyTexture { src, dst });
    }

    fn resolve_texture(&mut self, src: TextureId, dst: TextureId, _format: NativeFormat) {
        self.calls.push(DeviceCall::ResolveTexture { src, dst });
    }

    fn read_texture(&mut self, id: TextureId) -> Result<TextureData, DeviceError> {
        if let Some(data) = self.scripted_readback.get(&id) {
            return Ok(data.clone());
        }
        let desc = self
            .textures
            .get(&id)
            .ok_or_else(|| DeviceError::Readback("unknown texture".to_string()))?;
        let pitch = desc.width as usize * Self::bytes_per_pixel(desc.format);
        Ok(TextureData {
            data: vec![0; pitch * desc.height as usize],
            row_pitch: pitch,
        })
    }

    fn set_shaders(&mut self, vs: Option<ShaderId>, ps: Option<ShaderId>) {
        self.calls.push(DeviceCall::SetShaders { vs, ps });
    }

    fn set_blend_state(&mut self, state: Option<BlendStateId>) {
        self.calls.push(DeviceCall::SetBlendState(state));
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>, stencil_ref: u32) {
        self.calls
            .push(DeviceCall::SetDepthStencilState { state, stencil_ref });
    }

    fn set_samplers(&mut self, samplers: &[Option<SamplerId>]) {
        self.calls.push(DeviceCall::SetSamplers(samplers.to_vec()));
    }

    fn set_shader_resources(&mut self, views: &[Option<ViewId>]) {
        self.calls
            .push(DeviceCall::SetShaderResources(views.to_vec()));
    }

    fn set_render_targets(&mut self, targets: &[Option<ViewId>], depth_stencil: Option<ViewId>) {
        self.calls.push(DeviceCall::SetRenderTargets {
            targets: targets.to_vec(),
            depth_stencil,
        });
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.calls.push(DeviceCall::SetViewport { width, height });
    }

    fn set_constant_buffer(&mut self, buffer: Option<BufferId>) {
        self.calls.push(DeviceCall::SetConstantBuffer(buffer));
    }

    fn clear_render_target(&mut self, view: ViewId, color: [f32; 4]) {
        self.calls.push(DeviceCall::ClearRenderTarget { view, color });
    }

    fn clear_stencil(&mut self, view: ViewId, value: u8) {
        self.calls.push(DeviceCall::ClearStencil { view, value });
    }

    fn draw(&mut self, vertex_count: u32) {
        self.calls.push(DeviceCall::Draw(vertex_count));
    }

    fn create_timestamp_query(&mut self) -> Result<QueryId, DeviceError> {
        let id = QueryId(self.next());
        self.queries.insert(id, ());
        Ok(id)
    }

    fn create_disjoint_query(&mut self) -> Result<QueryId, DeviceError> {
        let id = QueryId(self.next());
        self.queries.insert(id, ());
        Ok(id)
    }

    fn destroy_query(&mut self, id: QueryId) {
        self.queries.remove(&id);
        self.scripted_timestamps.remove(&id);
        self.scripted_disjoint.remove(&id);
    }

    fn begin_disjoint_query(&mut self, id: QueryId) {
        self.calls.push(DeviceCall::BeginDisjointQuery(id));
    }

    fn end_disjoint_query(&mut self, id: QueryId) {
        self.calls.push(DeviceCall::EndDisjointQuery(id));
    }

    fn write_timestamp(&mut self, id: QueryId) {
        self.calls.push(DeviceCall::WriteTimestamp(id));
    }

    fn poll_timestamp(&mut self, id: QueryId) -> Option<u64> {
        self.scripted_timestamps.get(&id).copied()
    }

    fn poll_disjoint(&mut self, id: QueryId) -> Option<DisjointResult> {
        self.scripted_disjoint.get(&id).copied()
    }

    fn capture_state(&mut self) {
        self.calls.push(DeviceCall::CaptureState);
    }

    fn restore_state(&mut self) {
        self.calls.push(DeviceCall::RestoreState);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mock_is_empty() {
        let mock = MockDevice::new();
        assert_eq!(mock.call_count(), 0);
        assert!(mock.all_released());
    }

    #[test]
    fn test_handles_are_tracked() {
        let mut mock = MockDevice::new();

        let tex = mock.create_texture(&TextureDesc::default()).unwrap();
        assert_eq!(mock.alive_textures(), 1);
        assert!(mock.texture_desc(tex).is_some());

        let view = mock
            .create_view(
                tex,
                &ViewDesc {
                    kind: ViewKind::ShaderResource,
                    format: NativeFormat::Rgba8Unorm,
                    mip_levels: 1,
                },
            )
            .unwrap();
        assert_eq!(mock.view_texture(view), Some(tex));

        mock.destroy_view(view);
        mock.destroy_texture(tex);
        assert!(mock.all_released());
        assert_eq!(mock.calls_destroy_view(), vec![view]);
    }

    #[test]
    fn test_failure_injection_is_one_shot() {
        let mut mock = MockDevice::new();
        mock.fail_texture_creation = true;

        assert!(mock.create_texture(&TextureDesc::default()).is_err());
        assert!(mock.create_texture(&TextureDesc::default()).is_ok());
    }

    #[test]
    fn test_scripted_queries() {
        let mut mock = MockDevice::new();
        let query = mock.create_timestamp_query().unwrap();

        assert_eq!(mock.poll_timestamp(query), None);
        mock.script_timestamp(query, 1234);
        assert_eq!(mock.poll_timestamp(query), Some(1234));

        let disjoint = mock.create_disjoint_query().unwrap();
        mock.script_disjoint(disjoint, false, 1_000_000_000);
        let result = mock.poll_disjoint(disjoint).unwrap();
        assert!(!result.disjoint);
        assert_eq!(result.frequency, 1_000_000_000);
    }

    #[test]
    fn test_call_recording() {
        let mut mock = MockDevice::new();

        mock.set_render_targets(&[Some(ViewId(1)), None], None);
        mock.draw(3);
        mock.draw(3);

        assert_eq!(mock.draw_count(), 2);
        assert_eq!(
            mock.last_render_targets(),
            Some([Some(ViewId(1)), None].as_slice())
        );

        mock.clear_calls();
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_default_readback_sized_from_desc() {
        let mut mock = MockDevice::new();
        let tex = mock
            .create_texture(&TextureDesc {
                width: 8,
                height: 2,
                ..TextureDesc::default()
            })
            .unwrap();

        let data = mock.read_texture(tex).unwrap();
        assert_eq!(data.row_pitch, 32);
        assert_eq!(data.data.len(), 64);
    }
}
