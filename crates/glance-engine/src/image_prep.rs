use std::io::Cursor;

use glance_contracts::DispatchError;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::debug;

/// Longest edge allowed when scaling is requested.
pub const MAX_DIMENSION: u32 = 1024;
/// Hard ceiling on the payload handed to a provider.
pub const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

// Encoder overhead can leave a sqrt-sized pass a few bytes over the ceiling.
const MAX_SHRINK_PASSES: usize = 4;

pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

pub fn mime_for_format(format: ImageFormat) -> String {
    format!("image/{}", format_label(format))
}

/// MIME type sniffed from magic bytes, `image/png` when unknown.
pub fn sniff_mime(bytes: &[u8]) -> String {
    detect_format(bytes)
        .map(mime_for_format)
        .unwrap_or_else(|| "image/png".to_string())
}

fn format_label(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Ico => "x-icon",
        ImageFormat::Avif => "avif",
        ImageFormat::Qoi => "qoi",
        ImageFormat::Tga => "x-tga",
        ImageFormat::Pnm => "x-portable-anymap",
        ImageFormat::Hdr => "vnd.radiance",
        ImageFormat::OpenExr => "x-exr",
        ImageFormat::Dds => "vnd-ms.dds",
        ImageFormat::Farbfeld => "x-farbfeld",
        _ => "png",
    }
}

/// Checks the bytes are a recognizable image and shrinks them to fit the
/// provider limits.
///
/// With `allow_scale` the image is downsampled so neither side exceeds
/// [`MAX_DIMENSION`]; it is never upscaled. Independently, anything above
/// [`MAX_IMAGE_BYTES`] is resized by `sqrt(ceiling / size)` and re-encoded.
/// Bytes that need neither step come back untouched.
pub fn validate_and_prepare(
    raw: &[u8],
    allow_scale: bool,
) -> Result<(Vec<u8>, String), DispatchError> {
    let format = detect_format(raw)
        .ok_or_else(|| DispatchError::InvalidFormat("Invalid image format".to_string()))?;
    if !allow_scale && raw.len() <= MAX_IMAGE_BYTES {
        return Ok((raw.to_vec(), mime_for_format(format)));
    }

    let mut image = image::load_from_memory_with_format(raw, format)
        .map_err(|err| DispatchError::InvalidFormat(format!("image decode failed: {err}")))?;
    let mut bytes = raw.to_vec();
    let mut out_format = format;

    if allow_scale {
        let (width, height) = image.dimensions();
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            image = image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3);
            (bytes, out_format) = encode(&image, format)?;
            debug!(
                from_width = width,
                from_height = height,
                width = image.width(),
                height = image.height(),
                bytes = bytes.len(),
                "downscaled image to dimension cap"
            );
        }
    }

    let mut passes = 0;
    while bytes.len() > MAX_IMAGE_BYTES {
        if passes == MAX_SHRINK_PASSES {
            return Err(DispatchError::InvalidFormat(format!(
                "image too large: {} bytes after {passes} resize passes (limit {MAX_IMAGE_BYTES})",
                bytes.len()
            )));
        }
        let factor = (MAX_IMAGE_BYTES as f64 / bytes.len() as f64).sqrt();
        let (width, height) = image.dimensions();
        let new_width = shrink_dimension(width, factor);
        let new_height = shrink_dimension(height, factor);
        image = image.resize_exact(new_width, new_height, FilterType::Lanczos3);
        (bytes, out_format) = encode(&image, out_format)?;
        passes += 1;
        debug!(
            factor,
            width = new_width,
            height = new_height,
            bytes = bytes.len(),
            "shrank image toward byte ceiling"
        );
    }

    Ok((bytes, mime_for_format(out_format)))
}

fn shrink_dimension(value: u32, factor: f64) -> u32 {
    let scaled = (f64::from(value) * factor) as u32;
    scaled.min(value.saturating_sub(1)).max(1)
}

/// Writes `image` as `format`, falling back to PNG when that encoder is
/// unavailable or rejects the pixel layout.
fn encode(
    image: &DynamicImage,
    format: ImageFormat,
) -> Result<(Vec<u8>, ImageFormat), DispatchError> {
    if format != ImageFormat::Png {
        if let Ok(bytes) = encode_as(image, format) {
            return Ok((bytes, format));
        }
    }
    encode_as(image, ImageFormat::Png)
        .map(|bytes| (bytes, ImageFormat::Png))
        .map_err(|err| DispatchError::InvalidFormat(format!("image re-encode failed: {err}")))
}

fn encode_as(image: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut cursor, format)?
        }
        ImageFormat::Gif | ImageFormat::WebP => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut cursor, format)?
        }
        _ => image.write_to(&mut cursor, format)?,
    }
    Ok(cursor.into_inner())
}
