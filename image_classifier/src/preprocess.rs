use crate::{
    config::PreprocessingConfig,
    error::{ClassifierError, ClassifierResult},
};
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Batch of one image laid out as (batch, channel, height, width).
pub type ImageTensor = Array4<f32>;

const TOLERANCE: f32 = 1e-6;

/// Above this the whole image is not resized before cropping.
const MAX_RESIZED_PIXELS: u64 = 4096 * 4096;

/// Per-channel statistics the model was trained with, RGB order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    pub fn try_new(mean: &[f32], std: &[f32]) -> Result<Self, String> {
        let mean: [f32; 3] = mean
            .try_into()
            .map_err(|_| format!("Expected 3 mean values, got {}", mean.len()))?;
        let std: [f32; 3] = std
            .try_into()
            .map_err(|_| format!("Expected 3 std values, got {}", std.len()))?;
        if std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(format!("Standard deviations must be positive: {:?}", std));
        }
        if mean.iter().any(|m| !m.is_finite()) {
            return Err(format!("Means must be finite: {:?}", mean));
        }
        Ok(Self { mean, std })
    }

    pub fn matches(&self, other: &Normalization) -> bool {
        self.mean
            .iter()
            .chain(self.std.iter())
            .zip(other.mean.iter().chain(other.std.iter()))
            .all(|(a, b)| (a - b).abs() <= TOLERANCE)
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::IMAGENET
    }
}

/// Decode, resize the shorter edge, center-crop, scale and normalize.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    pub resize: u32,
    pub crop: u32,
    pub normalization: Normalization,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            resize: 256,
            crop: 224,
            normalization: Normalization::IMAGENET,
        }
    }
}

impl Preprocessor {
    pub fn from_config(preprocessing: &PreprocessingConfig) -> Result<Self, String> {
        preprocessing.validate()?;
        Ok(Self {
            resize: preprocessing.resize,
            crop: preprocessing.crop,
            normalization: preprocessing.get_normalization()?,
        })
    }

    pub fn transform(&self, image_bytes: &[u8]) -> ClassifierResult<ImageTensor> {
        let rgb = decode_rgb(image_bytes)?;
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifierError::InvalidImageFormat(
                "image has no pixels".to_string(),
            ));
        }

        let cropped = self.resize_and_crop(&rgb);

        let side = self.crop as usize;
        let Normalization { mean, std } = self.normalization;
        let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let value = cropped.get_pixel(x as u32, y as u32)[c] as f32 / 255.;
            (value - mean[c]) / std[c]
        });

        Ok(tensor)
    }

    fn resize_and_crop(&self, rgb: &RgbImage) -> RgbImage {
        let (width, height) = rgb.dimensions();
        let (new_width, new_height) = resized_dimensions(width, height, self.resize);

        if u64::from(new_width) * u64::from(new_height) <= MAX_RESIZED_PIXELS {
            let resized = imageops::resize(rgb, new_width, new_height, FilterType::Triangle);
            let left = crop_offset(new_width, self.crop);
            let top = crop_offset(new_height, self.crop);
            return imageops::crop_imm(&resized, left, top, self.crop, self.crop).to_image();
        }

        tracing::debug!(
            "Resizing {}x{} to {}x{} would be too large, resampling the crop window only",
            width,
            height,
            new_width,
            new_height
        );
        crop_then_resize(rgb, self.resize, self.crop)
    }
}

/// Resamples only the part of `rgb` that lands in the centered crop window.
fn crop_then_resize(rgb: &RgbImage, resize: u32, crop: u32) -> RgbImage {
    let (width, height) = rgb.dimensions();
    let (new_width, new_height) = resized_dimensions(width, height, resize);
    let x = source_span(width, new_width, crop);
    let y = source_span(height, new_height, crop);

    let region = imageops::crop_imm(rgb, x.start, y.start, x.len, y.len).to_image();
    let resized = imageops::resize(&region, x.resized_len, y.resized_len, FilterType::Triangle);
    imageops::crop_imm(&resized, x.offset, y.offset, crop, crop).to_image()
}

/// Source pixels feeding a crop window along one axis, with the window's
/// position once that slice is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: u32,
    len: u32,
    resized_len: u32,
    offset: u32,
}

fn source_span(src_len: u32, resized_len: u32, window: u32) -> Span {
    let offset = crop_offset(resized_len, window);
    let ratio = f64::from(resized_len) / f64::from(src_len);
    // Triangle reads one source pixel each side, widened when downscaling.
    let margin = (1.0 / ratio).max(1.0).ceil() + 1.0;

    let start = ((f64::from(offset) / ratio).floor() - margin).max(0.0) as u32;
    let end = ((f64::from(offset + window) / ratio).ceil() + margin).min(f64::from(src_len)) as u32;
    let len = end - start;

    let piece_len = ((f64::from(len) * ratio).round() as u32).max(window);
    let piece_offset = (f64::from(offset) - f64::from(start) * ratio).round().max(0.0) as u32;

    Span {
        start,
        len,
        resized_len: piece_len,
        offset: piece_offset.min(piece_len - window),
    }
}

/// Runs the default pipeline: shorter edge 256, center crop 224, ImageNet
/// statistics.
pub fn preprocess(image_bytes: &[u8]) -> ClassifierResult<ImageTensor> {
    Preprocessor::default().transform(image_bytes)
}

fn decode_rgb(image_bytes: &[u8]) -> ClassifierResult<RgbImage> {
    let image_reader = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|e| ClassifierError::InvalidImageFormat(format!("Error reading image: {}", e)))?;

    let decoded = image_reader
        .decode()
        .map_err(|e| ClassifierError::InvalidImageFormat(format!("Error decoding image: {}", e)))?;

    Ok(decoded.to_rgb8())
}

/// Scales so the shorter edge equals `target`; the longer edge is truncated.
fn resized_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let (short, long) = if width <= height {
        (width, height)
    } else {
        (height, width)
    };
    let new_long = (u64::from(target) * u64::from(long) / u64::from(short)) as u32;
    if width <= height {
        (target, new_long)
    } else {
        (new_long, target)
    }
}

/// Offset of a centered window, halves rounded to even.
fn crop_offset(length: u32, window: u32) -> u32 {
    let slack = length.saturating_sub(window);
    let half = slack / 2;
    if slack % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}
