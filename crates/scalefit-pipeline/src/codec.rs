//! In-memory image decoding and encoding.
//!
//! Inputs must already be single-channel: a color reference would make
//! the similarity score depend on an arbitrary luma conversion, so color
//! images are rejected rather than converted.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::types::{GrayImage, PipelineError};

/// Decode PNG, JPEG, BMP, or WebP bytes into an 8-bit grayscale image.
///
/// 16-bit luma is narrowed to 8 bits.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty,
/// [`PipelineError::ImageDecode`] if the format is unrecognized or
/// corrupt, or [`PipelineError::UnsupportedChannels`] if the image has
/// more than one channel.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    match image::load_from_memory(bytes)? {
        DynamicImage::ImageLuma8(gray) => Ok(gray),
        other if other.color().channel_count() == 1 => Ok(other.to_luma8()),
        other => Err(PipelineError::UnsupportedChannels {
            channels: other.color().channel_count(),
        }),
    }
}

/// Encode a grayscale image as PNG.
///
/// # Errors
///
/// Returns [`PipelineError::ImageDecode`] if encoding fails.
pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
