use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, RgbImage};
use image_hasher::{HashAlg, HasherConfig, ImageHash};
use serde::{Deserialize, Serialize};

use super::source::RawFrame;
use crate::error::CameraError;

/// JPEG quality used for throwaway detection frames.
pub const SCAN_JPEG_QUALITY: u8 = 70;
/// JPEG quality used for frames that become stored evidence.
pub const EVIDENCE_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameQuality {
    Scan,
    Evidence,
}

impl FrameQuality {
    pub fn jpeg_quality(self) -> u8 {
        match self {
            FrameQuality::Scan => SCAN_JPEG_QUALITY,
            FrameQuality::Evidence => EVIDENCE_JPEG_QUALITY,
        }
    }
}

/// An encoded sample ready for analysis or storage.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub phash: String,
    pub quality: FrameQuality,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.jpeg)
    }
}

/// Encode one raw grab into a `Frame`.
///
/// Returns `Ok(None)` while the device is still warming up and reports a
/// zero-sized frame; callers treat that as "try again later", never as an
/// error.
pub fn encode_frame(raw: RawFrame, quality: FrameQuality) -> Result<Option<Frame>, CameraError> {
    if raw.width == 0 || raw.height == 0 {
        return Ok(None);
    }

    let width = raw.width;
    let height = raw.height;
    let rgb = RgbImage::from_vec(width, height, raw.pixels).ok_or_else(|| {
        CameraError::Capture(format!("frame buffer does not match {width}x{height} RGB8"))
    })?;
    let image = DynamicImage::ImageRgb8(rgb);

    let phash = compute_phash(&image);

    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.jpeg_quality());
    image
        .write_with_encoder(encoder)
        .map_err(|err| CameraError::Capture(format!("jpeg encode failed: {err}")))?;

    Ok(Some(Frame {
        jpeg,
        width,
        height,
        phash,
        quality,
        captured_at: Utc::now(),
    }))
}

pub fn compute_phash(image: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    hasher.hash_image(image).to_base64()
}

pub fn compute_hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}
