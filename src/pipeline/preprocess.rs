//! Image preprocessing applied before each OCR pass.
//!
//! Every strategy runs the same chain with different strengths:
//! autocontrast → median filter → unsharp mask → (orientation fix) → binarise.
//! Orientation needs the OCR engine, so the pass runner applies it between
//! [`enhance`] and [`binarize`].

use image::imageops;
use image::GrayImage;
use imageproc::contrast::{otsu_level, stretch_contrast, threshold, ThresholdType};
use imageproc::filter::median_filter;
use imageproc::stats::percentile;
use serde::{Deserialize, Serialize};

/// One named set of preprocessing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessStrategy {
    pub name: String,
    /// Base binarisation threshold, averaged with the page's Otsu level.
    pub threshold: u8,
    /// Median filter radius in pixels (1 = 3×3 window).
    pub median_radius: u32,
    pub unsharp_sigma: f32,
    pub unsharp_threshold: i32,
    /// Percentage of darkest and lightest pixels clipped by autocontrast.
    pub autocontrast_cutoff: u8,
    /// Ask the engine for page orientation and rotate before binarising.
    pub detect_orientation: bool,
}

const RETRY_THRESHOLDS: [u8; 2] = [220, 180];
const RETRY_ORIENTATION: [bool; 2] = [true, false];

impl PreprocessStrategy {
    pub fn standard() -> Self {
        Self {
            name: "standard".into(),
            threshold: 200,
            median_radius: 1,
            unsharp_sigma: 1.0,
            unsharp_threshold: 3,
            autocontrast_cutoff: 1,
            detect_orientation: true,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            name: "aggressive".into(),
            threshold: 220,
            median_radius: 2,
            unsharp_sigma: 2.0,
            unsharp_threshold: 3,
            autocontrast_cutoff: 2,
            detect_orientation: true,
        }
    }

    /// Strategy for the retry with 0-based index `attempt`.
    ///
    /// Threshold and orientation detection alternate between attempts; the
    /// filters stay at aggressive strength.
    pub fn retry(attempt: u32) -> Self {
        let slot = attempt as usize % RETRY_THRESHOLDS.len();
        Self {
            name: format!("retry-{}", attempt + 1),
            threshold: RETRY_THRESHOLDS[slot],
            detect_orientation: RETRY_ORIENTATION[slot],
            ..Self::aggressive()
        }
    }

    /// Same filters without orientation detection. Used for table cells,
    /// which are too small for OSD.
    pub fn without_orientation(&self) -> Self {
        Self {
            detect_orientation: false,
            ..self.clone()
        }
    }
}

/// Contrast stretch, denoise and sharpen. Output is still greyscale.
pub fn enhance(image: &GrayImage, strategy: &PreprocessStrategy) -> GrayImage {
    let stretched = autocontrast(image, strategy.autocontrast_cutoff);
    let denoised = if strategy.median_radius > 0 {
        median_filter(&stretched, strategy.median_radius, strategy.median_radius)
    } else {
        stretched
    };
    imageops::unsharpen(&denoised, strategy.unsharp_sigma, strategy.unsharp_threshold)
}

/// Full chain minus orientation.
pub fn apply(image: &GrayImage, strategy: &PreprocessStrategy) -> GrayImage {
    binarize(&enhance(image, strategy), strategy.threshold)
}

/// Linear stretch so the `cutoff_pct` darkest pixels map to 0 and the
/// `cutoff_pct` lightest map to 255.
pub fn autocontrast(image: &GrayImage, cutoff_pct: u8) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let cutoff = cutoff_pct.min(49);
    let (lo, hi) = if cutoff == 0 {
        let values = image.pixels().map(|p| p.0[0]);
        (values.clone().min().unwrap_or(0), values.max().unwrap_or(255))
    } else {
        (percentile(image, cutoff), percentile(image, 100 - cutoff))
    };
    if hi <= lo {
        return image.clone();
    }
    stretch_contrast(image, lo, hi, 0, 255)
}

/// Black/white at `(otsu + base) / 2`: pixels above the level become white.
pub fn binarize(image: &GrayImage, base: u8) -> GrayImage {
    let level = ((otsu_level(image) as u16 + base as u16) / 2) as u8;
    threshold(image, level, ThresholdType::Binary)
}

/// Rotate clockwise by a multiple of 90 degrees. Other angles are ignored.
pub fn rotate(image: &GrayImage, degrees_cw: u32) -> GrayImage {
    match degrees_cw % 360 {
        90 => imageops::rotate90(image),
        180 => imageops::rotate180(image),
        270 => imageops::rotate270(image),
        _ => image.clone(),
    }
}
