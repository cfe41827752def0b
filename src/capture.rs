//! Screenshot capture
//!
//! Synchronously stages the current presented surface into CPU memory and
//! converts it to tightly packed, top-to-bottom RGBA8 regardless of the
//! storage channel order. The 10-bit packed format is down-converted by
//! integer division, not rounding, and the alpha channel is forced opaque.

use crate::device::{DeviceError, GpuDevice, NativeFormat, TextureData};
use crate::formats;
use crate::runtime::Runtime;

/// Convert one captured surface to RGBA8
///
/// `out` must hold `width * height * 4` bytes. Fails for formats the
/// conversion does not understand rather than guessing a channel layout.
pub fn convert_to_rgba8(
    source: &TextureData,
    width: u32,
    height: u32,
    format: NativeFormat,
    out: &mut [u8],
) -> Result<(), DeviceError> {
    let width = width as usize;
    let height = height as usize;
    debug_assert_eq!(out.len(), width * height * 4);

    if formats::color_bit_depth(format) == 10 {
        for y in 0..height {
            let row = &source.data[y * source.row_pitch..y * source.row_pitch + width * 4];
            let out_row = &mut out[y * width * 4..(y + 1) * width * 4];
            for x in 0..width {
                let packed: u32 = bytemuck::pod_read_unaligned(&row[x * 4..x * 4 + 4]);
                out_row[x * 4] = ((packed & 0x3FF) / 4) as u8;
                out_row[x * 4 + 1] = (((packed >> 10) & 0x3FF) / 4) as u8;
                out_row[x * 4 + 2] = (((packed >> 20) & 0x3FF) / 4) as u8;
                out_row[x * 4 + 3] = 0xFF;
            }
        }
        return Ok(());
    }

    match format {
        NativeFormat::Rgba8Unorm
        | NativeFormat::Rgba8UnormSrgb
        | NativeFormat::Bgra8Unorm
        | NativeFormat::Bgra8UnormSrgb => {
            let swap = formats::is_bgra(format);
            for y in 0..height {
                let row = &source.data[y * source.row_pitch..y * source.row_pitch + width * 4];
                let out_row = &mut out[y * width * 4..(y + 1) * width * 4];
                out_row.copy_from_slice(row);
                for px in out_row.chunks_exact_mut(4) {
                    if swap {
                        px.swap(0, 2);
                    }
                    px[3] = 0xFF;
                }
            }
        }
        _ => return Err(DeviceError::UnsupportedFormat(format)),
    }
    Ok(())
}

impl<D: GpuDevice> Runtime<D> {
    /// Capture the current presented surface as top-to-bottom RGBA8
    pub fn capture_screenshot(&mut self) -> Result<Vec<u8>, DeviceError> {
        let surface = self
            .back_buffer_resolved
            .ok_or_else(|| DeviceError::Readback("output is not initialized".to_string()))?;

        let staged = self.device.read_texture(surface)?;
        let mut out = vec![0u8; self.width as usize * self.height as usize * 4];
        convert_to_rgba8(
            &staged,
            self.width,
            self.height,
            formats::normal_format(self.output_format),
            &mut out,
        )?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(bytes: Vec<u8>, row_pitch: usize) -> TextureData {
        TextureData { data: bytes, row_pitch }
    }

    #[test]
    fn test_rgba8_passthrough_forces_alpha() {
        let source = data(vec![10, 20, 30, 40, 50, 60, 70, 80], 8);
        let mut out = vec![0u8; 8];
        convert_to_rgba8(&source, 2, 1, NativeFormat::Rgba8Unorm, &mut out).unwrap();
        assert_eq!(out, vec![10, 20, 30, 255, 50, 60, 70, 255]);
    }

    #[test]
    fn test_bgra_channels_are_swapped() {
        let source = data(vec![10, 20, 30, 40], 4);
        let mut out = vec![0u8; 4];
        convert_to_rgba8(&source, 1, 1, NativeFormat::Bgra8Unorm, &mut out).unwrap();
        assert_eq!(out, vec![30, 20, 10, 255]);
    }

    #[test]
    fn test_10bit_white_converts_to_full_intensity() {
        // All three 10-bit channels at 1023
        let packed: u32 = 0x3FF | (0x3FF << 10) | (0x3FF << 20);
        let source = data(packed.to_le_bytes().to_vec(), 4);
        let mut out = vec![0u8; 4];
        convert_to_rgba8(&source, 1, 1, NativeFormat::Rgb10a2Unorm, &mut out).unwrap();
        assert_eq!(out, vec![255, 255, 255, 255]);
    }

    #[test]
    fn test_10bit_uses_integer_division() {
        // 515 / 4 == 128 with truncation, not 129 by rounding
        let packed: u32 = 515;
        let source = data(packed.to_le_bytes().to_vec(), 4);
        let mut out = vec![0u8; 4];
        convert_to_rgba8(&source, 1, 1, NativeFormat::Rgb10a2Unorm, &mut out).unwrap();
        assert_eq!(out[0], 128);
    }

    #[test]
    fn test_row_pitch_padding_is_skipped() {
        // 1 pixel per row, 8 byte pitch
        let source = data(vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0], 8);
        let mut out = vec![0u8; 8];
        convert_to_rgba8(&source, 1, 2, NativeFormat::Rgba8Unorm, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 255, 5, 6, 7, 255]);
    }

    #[test]
    fn test_float_format_is_rejected() {
        let source = data(vec![0u8; 8], 8);
        let mut out = vec![0u8; 4];
        let err = convert_to_rgba8(&source, 1, 1, NativeFormat::Rgba16Float, &mut out).unwrap_err();
        assert!(matches!(err, DeviceError::UnsupportedFormat(_)));
    }
}
