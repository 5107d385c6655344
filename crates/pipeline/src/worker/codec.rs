//! Pixel decode/encode
//!
//! [`ImageCodec`] decodes with the `image` crate, or with libheif for
//! HEIC/HEIF containers when built with the `heif` feature, and re-encodes to
//! the requested target format.

use crate::config::TargetFormat;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// ISO-BMFF major brands that identify a HEIF image container
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"hevm", b"hevs", b"mif1", b"msf1",
];

/// Error type for codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode {format}: {message}")]
    Encode { format: TargetFormat, message: String },

    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

/// Synchronous decode/encode step run inside a worker.
pub trait Codec: Send + Sync {
    fn convert(&self, bytes: &[u8], format: TargetFormat, quality: f32) -> Result<Vec<u8>, CodecError>;
}

/// Whether this build can decode HEIC/HEIF input
pub fn heif_supported() -> bool {
    cfg!(feature = "heif")
}

/// Whether `bytes` start with an `ftyp` box naming a HEIF brand
pub fn is_heif_container(bytes: &[u8]) -> bool {
    match (bytes.get(4..8), bytes.get(8..12)) {
        (Some(b"ftyp"), Some(brand)) => HEIF_BRANDS.iter().any(|b| b.as_slice() == brand),
        _ => false,
    }
}

/// Maps quality in (0, 1] to the JPEG encoder's 1..=100 scale
pub fn jpeg_quality(quality: f32) -> u8 {
    ((quality * 100.0).round() as i32).clamp(1, 100) as u8
}

/// Codec built on the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Decode("input is empty".to_string()));
        }
        if is_heif_container(bytes) {
            return decode_heif(bytes);
        }
        image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, image: &DynamicImage, format: TargetFormat, quality: f32) -> Result<Vec<u8>, CodecError> {
        let encode_err = |e: image::ImageError| CodecError::Encode {
            format,
            message: e.to_string(),
        };
        let mut out = Vec::new();

        match format {
            TargetFormat::Jpeg => {
                let rgb = image.to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality(quality));
                encoder.encode_image(&rgb).map_err(encode_err)?;
            }
            TargetFormat::Png => {
                let normalized = if image.color().has_alpha() {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                };
                normalized
                    .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                    .map_err(encode_err)?;
            }
            TargetFormat::Webp => {
                // The image crate only writes lossless WebP; quality is unused.
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)
                    .map_err(encode_err)?;
            }
        }

        Ok(out)
    }
}

impl Codec for ImageCodec {
    fn convert(&self, bytes: &[u8], format: TargetFormat, quality: f32) -> Result<Vec<u8>, CodecError> {
        let image = self.decode(bytes)?;
        self.encode(&image, format, quality)
    }
}

#[cfg(feature = "heif")]
fn decode_heif(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes)
        .map_err(|e| CodecError::Decode(format!("Failed to read HEIF container: {}", e)))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|e| CodecError::Decode(format!("Failed to get primary image: {}", e)))?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| CodecError::Decode(format!("Failed to decode HEIF: {}", e)))?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| CodecError::Decode("No RGB plane found".to_string()))?;

    // Rows may be padded past width * 3
    let row_len = plane.width as usize * 3;
    let mut data = Vec::with_capacity(row_len * plane.height as usize);
    for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
        let row = row
            .get(..row_len)
            .ok_or_else(|| CodecError::Decode("Truncated RGB plane".to_string()))?;
        data.extend_from_slice(row);
    }

    image::RgbImage::from_raw(plane.width, plane.height, data)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| CodecError::Decode("Failed to create RGB image".to_string()))
}

#[cfg(not(feature = "heif"))]
fn decode_heif(_bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    Err(CodecError::Unsupported(
        "HEIC/HEIF decoding is not available in this build (enable the `heif` feature)".to_string(),
    ))
}
