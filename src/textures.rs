//! Texture manager
//!
//! Creates and destroys GPU textures for each effect-declared texture,
//! together with their read (shader-resource) and write (render-target)
//! views. Two reference pseudo-textures alias the live back buffer and the
//! tracked depth buffer instead of owning storage; those are repointed, never
//! recreated, when the aliased system resource changes.

use crate::device::{
    DeviceError, GpuDevice, TextureDesc, TextureId, ViewDesc, ViewId, ViewKind,
};
use crate::formats;
use prism_fx as fx;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TextureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("texture upload is not supported for format {format:?} of texture '{name}'")]
    UnsupportedUploadFormat {
        name: String,
        format: fx::TextureFormat,
    },
    #[error("unknown texture '{0}'")]
    UnknownTexture(String),
}

/// GPU-side state of one effect-declared texture
///
/// Read-views come in two color-space variants: `srv[0]` is the linear
/// interpretation, `srv[1]` the gamma-corrected one. When the format has no
/// distinct sRGB representation both slots hold the same handle. Write-views
/// are created lazily the first time a pass renders into the texture.
pub struct EffectTexture {
    pub decl: fx::TextureDecl,
    /// Effect that declared this texture, for per-effect unload
    pub effect_index: usize,
    /// Owned storage; `None` for reference textures
    pub storage: Option<TextureId>,
    pub srv: [Option<ViewId>; 2],
    pub rtv: [Option<ViewId>; 2],
}

impl EffectTexture {
    pub fn is_reference(&self) -> bool {
        self.decl.reference != fx::TextureReference::None
    }
}

/// Externally owned views the reference textures alias
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceViews {
    /// Back buffer read-views, linear and gamma variants
    pub back_buffer: [Option<ViewId>; 2],
    /// Tracked depth buffer read-view, if one is currently bound
    pub depth: Option<ViewId>,
}

#[derive(Default)]
pub struct TextureManager {
    textures: Vec<EffectTexture>,
}

impl TextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate storage and the primary read-views for a texture declaration
    ///
    /// Reference textures allocate nothing and alias `refs` instead.
    pub fn create(
        &mut self,
        device: &mut dyn GpuDevice,
        effect_index: usize,
        decl: &fx::TextureDecl,
        refs: &ReferenceViews,
    ) -> Result<(), TextureError> {
        match decl.reference {
            fx::TextureReference::BackBuffer => {
                self.textures.push(EffectTexture {
                    decl: decl.clone(),
                    effect_index,
                    storage: None,
                    srv: refs.back_buffer,
                    rtv: [None, None],
                });
                return Ok(());
            }
            fx::TextureReference::DepthBuffer => {
                self.textures.push(EffectTexture {
                    decl: decl.clone(),
                    effect_index,
                    storage: None,
                    srv: [refs.depth, refs.depth],
                    rtv: [None, None],
                });
                return Ok(());
            }
            fx::TextureReference::None => {}
        }

        let format = formats::storage_format(decl.format);
        let desc = TextureDesc {
            label: decl.unique_name.clone(),
            width: decl.width,
            height: decl.height,
            mip_levels: decl.levels,
            sample_count: 1,
            format,
            render_target: true,
            shader_resource: true,
            depth_stencil: false,
            generate_mips: decl.levels > 1,
        };

        let storage = device.create_texture(&desc).inspect_err(|e| {
            log::error!(
                "Failed to create texture '{}' (Width = {}, Height = {}, Levels = {}, \
                 Format = {:?}): {e}",
                decl.unique_name,
                decl.width,
                decl.height,
                decl.levels,
                format
            );
        })?;

        let mut texture = EffectTexture {
            decl: decl.clone(),
            effect_index,
            storage: Some(storage),
            srv: [None, None],
            rtv: [None, None],
        };

        let srv_desc = ViewDesc {
            kind: ViewKind::ShaderResource,
            format: formats::normal_format(format),
            mip_levels: decl.levels,
        };
        match device.create_view(storage, &srv_desc) {
            Ok(view) => texture.srv[0] = Some(view),
            Err(e) => {
                log::error!(
                    "Failed to create shader resource view for texture '{}' (Format = {:?}): {e}",
                    decl.unique_name,
                    srv_desc.format
                );
                self.release_texture(device, &mut texture);
                return Err(e.into());
            }
        }

        if formats::has_distinct_srgb(format) {
            let srgb_desc = ViewDesc {
                format: formats::srgb_format(format),
                ..srv_desc
            };
            match device.create_view(storage, &srgb_desc) {
                Ok(view) => texture.srv[1] = Some(view),
                Err(e) => {
                    log::error!(
                        "Failed to create shader resource view for texture '{}' (Format = {:?}): {e}",
                        decl.unique_name,
                        srgb_desc.format
                    );
                    self.release_texture(device, &mut texture);
                    return Err(e.into());
                }
            }
        } else {
            // No distinct gamma representation; both variants share one view
            texture.srv[1] = texture.srv[0];
        }

        self.textures.push(texture);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&EffectTexture> {
        self.textures.iter().find(|t| t.decl.unique_name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut EffectTexture> {
        self.textures
            .iter_mut()
            .find(|t| t.decl.unique_name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectTexture> {
        self.textures.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EffectTexture> {
        self.textures.iter_mut()
    }

    /// Write-view for a named texture, created and cleared to zero on first use
    pub fn get_or_create_rtv(
        &mut self,
        device: &mut dyn GpuDevice,
        name: &str,
        srgb: bool,
    ) -> Result<ViewId, TextureError> {
        let texture = self
            .textures
            .iter_mut()
            .find(|t| t.decl.unique_name == name)
            .ok_or_else(|| TextureError::UnknownTexture(name.to_string()))?;

        let index = usize::from(srgb);
        if let Some(view) = texture.rtv[index] {
            return Ok(view);
        }

        let storage = texture
            .storage
            .ok_or_else(|| TextureError::UnknownTexture(name.to_string()))?;
        let storage_format = formats::storage_format(texture.decl.format);
        let rtv_desc = ViewDesc {
            kind: ViewKind::RenderTarget,
            format: if srgb {
                formats::srgb_format(storage_format)
            } else {
                formats::normal_format(storage_format)
            },
            mip_levels: 1,
        };

        let view = device.create_view(storage, &rtv_desc).inspect_err(|e| {
            log::error!(
                "Failed to create render target view for texture '{name}' (Format = {:?}): {e}",
                rtv_desc.format
            );
        })?;

        // Render target contents start out zeroed, not undefined
        device.clear_render_target(view, [0.0, 0.0, 0.0, 0.0]);

        texture.rtv[index] = Some(view);
        Ok(view)
    }

    /// Upload 4-channel 8-bit source pixels, repacking into tighter layouts
    pub fn upload(
        &mut self,
        device: &mut dyn GpuDevice,
        name: &str,
        pixels: &[u8],
    ) -> Result<(), TextureError> {
        let texture = self
            .textures
            .iter()
            .find(|t| t.decl.unique_name == name && !t.is_reference())
            .ok_or_else(|| TextureError::UnknownTexture(name.to_string()))?;
        let storage = texture
            .storage
            .ok_or_else(|| TextureError::UnknownTexture(name.to_string()))?;

        let width = texture.decl.width;
        let (data, pitch) = match repack_rgba8(pixels, texture.decl.format, width) {
            Some(repacked) => repacked,
            None => {
                log::error!(
                    "Texture upload is not supported for format {:?}!",
                    texture.decl.format
                );
                return Err(TextureError::UnsupportedUploadFormat {
                    name: name.to_string(),
                    format: texture.decl.format,
                });
            }
        };

        device.upload_texture(storage, &data, pitch);

        if texture.decl.levels > 1
            && let Some(srv) = texture.srv[0]
        {
            device.generate_mips(srv);
        }

        Ok(())
    }

    /// Release every texture belonging to one effect
    pub fn destroy_effect(&mut self, device: &mut dyn GpuDevice, effect_index: usize) {
        let mut kept = Vec::with_capacity(self.textures.len());
        for mut texture in std::mem::take(&mut self.textures) {
            if texture.effect_index == effect_index {
                self.release_texture(device, &mut texture);
            } else {
                kept.push(texture);
            }
        }
        self.textures = kept;
    }

    /// Release everything; safe to call repeatedly
    pub fn clear(&mut self, device: &mut dyn GpuDevice) {
        for mut texture in std::mem::take(&mut self.textures) {
            self.release_texture(device, &mut texture);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    fn release_texture(&self, device: &mut dyn GpuDevice, texture: &mut EffectTexture) {
        if texture.is_reference() {
            // Aliased views are owned elsewhere; just drop the references
            texture.srv = [None, None];
            return;
        }

        let shared_srv = texture.srv[0] == texture.srv[1];
        if let Some(view) = texture.srv[0].take() {
            device.destroy_view(view);
        }
        if let Some(view) = texture.srv[1].take()
            && !shared_srv
        {
            device.destroy_view(view);
        }
        for slot in &mut texture.rtv {
            if let Some(view) = slot.take() {
                device.destroy_view(view);
            }
        }
        if let Some(storage) = texture.storage.take() {
            device.destroy_texture(storage);
        }
    }
}

/// Repack 4-channel 8-bit pixel data into the destination format's layout
///
/// Returns the repacked bytes and the destination row pitch, or `None` when
/// the destination format does not support uploads.
fn repack_rgba8(pixels: &[u8], format: fx::TextureFormat, width: u32) -> Option<(Vec<u8>, u32)> {
    match format {
        fx::TextureFormat::R8 => {
            let data = pixels.chunks_exact(4).map(|px| px[0]).collect();
            Some((data, width))
        }
        fx::TextureFormat::Rg8 => {
            let mut data = Vec::with_capacity(pixels.len() / 2);
            for px in pixels.chunks_exact(4) {
                data.push(px[0]);
                data.push(px[1]);
            }
            Some((data, width * 2))
        }
        fx::TextureFormat::Rgba8 => Some((pixels.to_vec(), width * 4)),
        _ => None,
    }
}
