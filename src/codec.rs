use crate::error::{CompositeError, Result, Role};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

/// File name offered for the composited download
pub const OUTPUT_FILE_NAME: &str = "output.png";

/// Formats accepted for uploaded images
const ACCEPTED_FORMATS: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

/// Decode an uploaded image and normalize it to RGBA
///
/// Inputs without an alpha channel get a fully opaque one. Empty, corrupt,
/// unrecognised and non-JPEG/PNG streams all fail with `Decode`; a header
/// declaring zero width or height fails with `Dimension`.
pub fn decode_rgba(bytes: &[u8], role: Role) -> Result<RgbaImage> {
    let _span = tracing::debug_span!("decode", %role).entered();

    if bytes.is_empty() {
        return Err(CompositeError::Decode {
            role,
            reason: "input is empty".to_string(),
        });
    }

    let format = image::guess_format(bytes).map_err(|e| CompositeError::Decode {
        role,
        reason: e.to_string(),
    })?;

    if !ACCEPTED_FORMATS.contains(&format) {
        return Err(CompositeError::Decode {
            role,
            reason: format!("unsupported format {:?}, expected JPEG or PNG", format),
        });
    }

    // Decoders reject zero-sized headers as a format error, check them first
    if let Some((width, height)) = header_dimensions(bytes, format) {
        if width == 0 || height == 0 {
            return Err(CompositeError::Dimension {
                role,
                width,
                height,
                reason: "image has no pixels".to_string(),
            });
        }
    }

    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        CompositeError::Decode {
            role,
            reason: e.to_string(),
        }
    })?;

    tracing::debug!(
        "Decoded {} as {:?} {}x{} ({:?})",
        role,
        format,
        decoded.width(),
        decoded.height(),
        decoded.color()
    );

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(CompositeError::Dimension {
            role,
            width,
            height,
            reason: "image has no pixels".to_string(),
        });
    }

    Ok(rgba)
}

/// Width and height declared in a PNG IHDR or JPEG SOF header, without decoding pixels
fn header_dimensions(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    let be16 = |at: usize| -> Option<u32> {
        let b = bytes.get(at..at + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]) as u32)
    };
    let be32 = |at: usize| -> Option<u32> {
        let b = bytes.get(at..at + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    };

    match format {
        // 8 byte signature, 4 byte chunk length, "IHDR", then width and height
        ImageFormat::Png => {
            if bytes.get(12..16)? != b"IHDR" {
                return None;
            }
            Some((be32(16)?, be32(20)?))
        }
        ImageFormat::Jpeg => {
            let mut pos = 2;
            loop {
                if *bytes.get(pos)? != 0xFF {
                    return None;
                }
                while *bytes.get(pos)? == 0xFF {
                    pos += 1;
                }
                let marker = *bytes.get(pos)?;
                pos += 1;
                match marker {
                    0x01 | 0xD0..=0xD9 => continue,
                    0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                        // length(2) precision(1) height(2) width(2)
                        return Some((be16(pos + 5)?, be16(pos + 3)?));
                    }
                    _ => pos += be16(pos)? as usize,
                }
            }
        }
        _ => None,
    }
}

/// Encode an RGBA image as PNG
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(CompositeError::Encode)?;
    Ok(buffer.into_inner())
}
