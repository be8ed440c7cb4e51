//! Layout classification: a cheap structural guess at what a page contains.
//!
//! The class picks the OCR preset (segmentation modes, preprocessing) and the
//! layout-specific gate relaxation. It is a hand-tuned function over three
//! numeric signals, not a learned detector:
//!
//! * **ruling-line density**: share of pixels belonging to long horizontal or
//!   vertical ink runs, plus how many distinct lines there are per direction
//! * **ink density**: share of dark pixels on a 400×400 downscale
//! * **edge density**: share of strong gradients on the same downscale
//!
//! Classification never fails. A degenerate image degrades to
//! [`LayoutClass::Text`].

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::contrast::otsu_level;
use imageproc::gradients::sobel_gradients;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural category of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutClass {
    /// Ruled grid: tables, forms.
    Table,
    /// Ordinary running text.
    #[default]
    Text,
    /// Diagram-heavy, scanned noise, dense figures.
    Noisy,
}

impl LayoutClass {
    pub const ALL: [LayoutClass; 3] = [LayoutClass::Table, LayoutClass::Text, LayoutClass::Noisy];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutClass::Table => "table",
            LayoutClass::Text => "text",
            LayoutClass::Noisy => "noisy",
        }
    }
}

impl fmt::Display for LayoutClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunable cut-offs for [`classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutThresholds {
    /// Minimum ink run (pixels) that counts as a ruling line.
    pub min_run_length: u32,
    /// Line density above which a page may be a table.
    pub table_line_density: f64,
    /// Distinct ruling lines required in each direction for a table.
    pub min_ruling_lines: usize,
    /// Edge density above which a page is noisy.
    pub noisy_edge_density: f64,
    /// Ink density above which a page is noisy.
    pub noisy_ink_density: f64,
    /// Sobel magnitude that counts as an edge.
    pub edge_strength: u16,
    /// Grey level below which a downscaled pixel counts as ink.
    pub ink_level: u8,
}

impl Default for LayoutThresholds {
    fn default() -> Self {
        Self {
            min_run_length: 40,
            table_line_density: 0.01,
            min_ruling_lines: 2,
            noisy_edge_density: 0.08,
            noisy_ink_density: 0.35,
            edge_strength: 160,
            ink_level: 200,
        }
    }
}

/// Raw structural measurements of one page.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutSignals {
    pub line_density: f64,
    pub horizontal_lines: usize,
    pub vertical_lines: usize,
    pub ink_density: f64,
    pub edge_density: f64,
}

/// A contiguous band of rows (or columns) carrying a ruling line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineBand {
    pub start: u32,
    /// Inclusive.
    pub end: u32,
}

/// Ruling lines found on a page.
#[derive(Debug, Clone)]
pub struct RulingLines {
    pub horizontal: Vec<LineBand>,
    pub vertical: Vec<LineBand>,
    /// 255 where a pixel belongs to a ruling line, 0 elsewhere.
    pub mask: GrayImage,
    pub line_pixels: u64,
}

const SMALL_SIDE: u32 = 400;

/// Classify a rendered page.
pub fn classify(image: &GrayImage, thresholds: &LayoutThresholds) -> LayoutClass {
    match measure(image, thresholds) {
        Some(signals) => decide(&signals, thresholds),
        None => LayoutClass::Text,
    }
}

/// Decision policy over already-measured signals.
pub fn decide(signals: &LayoutSignals, t: &LayoutThresholds) -> LayoutClass {
    let ruled = signals.horizontal_lines >= t.min_ruling_lines
        && signals.vertical_lines >= t.min_ruling_lines;
    if signals.line_density > t.table_line_density && ruled {
        return LayoutClass::Table;
    }
    if signals.edge_density > t.noisy_edge_density || signals.ink_density > t.noisy_ink_density {
        return LayoutClass::Noisy;
    }
    LayoutClass::Text
}

/// Compute layout signals; `None` for an empty image.
pub fn measure(image: &GrayImage, t: &LayoutThresholds) -> Option<LayoutSignals> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    let lines = detect_ruling_lines(image, t.min_run_length);
    let line_density = lines.line_pixels as f64 / (w as u64 * h as u64) as f64;

    let small = imageops::resize(image, SMALL_SIDE, SMALL_SIDE, FilterType::Triangle);
    let total = (SMALL_SIDE * SMALL_SIDE) as f64;
    let ink = small.pixels().filter(|p| p.0[0] < t.ink_level).count() as f64;
    let edges = sobel_gradients(&small)
        .pixels()
        .filter(|p| p.0[0] > t.edge_strength)
        .count() as f64;

    Some(LayoutSignals {
        line_density,
        horizontal_lines: lines.horizontal.len(),
        vertical_lines: lines.vertical.len(),
        ink_density: ink / total,
        edge_density: edges / total,
    })
}

/// Find long horizontal and vertical ink runs.
///
/// Ink is anything at or below the page's Otsu level. A row (column) that
/// contains at least one run of `min_run` ink pixels belongs to a line band;
/// adjacent such rows merge into one band.
pub fn detect_ruling_lines(image: &GrayImage, min_run: u32) -> RulingLines {
    let (w, h) = image.dimensions();
    let mut mask = GrayImage::new(w, h);
    let level = otsu_level(image);
    let is_ink = |x: u32, y: u32| image.get_pixel(x, y).0[0] <= level;
    let min_run = min_run.max(1);

    let mut line_rows = vec![false; h as usize];
    for y in 0..h {
        let mut run_start = 0;
        let mut run = 0;
        for x in 0..=w {
            if x < w && is_ink(x, y) {
                if run == 0 {
                    run_start = x;
                }
                run += 1;
                continue;
            }
            if run >= min_run {
                line_rows[y as usize] = true;
                for rx in run_start..run_start + run {
                    mask.put_pixel(rx, y, image::Luma([255]));
                }
            }
            run = 0;
        }
    }

    let mut line_cols = vec![false; w as usize];
    for x in 0..w {
        let mut run_start = 0;
        let mut run = 0;
        for y in 0..=h {
            if y < h && is_ink(x, y) {
                if run == 0 {
                    run_start = y;
                }
                run += 1;
                continue;
            }
            if run >= min_run {
                line_cols[x as usize] = true;
                for ry in run_start..run_start + run {
                    mask.put_pixel(x, ry, image::Luma([255]));
                }
            }
            run = 0;
        }
    }

    let line_pixels = mask.pixels().filter(|p| p.0[0] > 0).count() as u64;

    RulingLines {
        horizontal: bands(&line_rows),
        vertical: bands(&line_cols),
        mask,
        line_pixels,
    }
}

fn bands(flags: &[bool]) -> Vec<LineBand> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &on) in flags.iter().enumerate() {
        match (on, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push(LineBand {
                    start: s as u32,
                    end: (i - 1) as u32,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(LineBand {
            start: s as u32,
            end: (flags.len() - 1) as u32,
        });
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;

    pub(crate) fn blank(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([255]))
    }

    /// White page with 2 px ruling lines every `step` pixels.
    pub(crate) fn grid(w: u32, h: u32, step: u32) -> GrayImage {
        let mut img = blank(w, h);
        for y in 0..h {
            for x in 0..w {
                if y % step < 2 || x % step < 2 {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        img
    }

    pub(crate) fn speckle(w: u32, h: u32) -> GrayImage {
        let mut img = blank(w, h);
        for y in 0..h {
            for x in 0..w {
                if ((x / 8) * 7 + (y / 8) * 13) % 3 == 0 {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        img
    }

    #[test]
    fn blank_page_is_text() {
        assert_eq!(classify(&blank(600, 800), &LayoutThresholds::default()), LayoutClass::Text);
    }

    #[test]
    fn empty_image_degrades_to_text() {
        assert_eq!(classify(&GrayImage::new(0, 0), &LayoutThresholds::default()), LayoutClass::Text);
    }

    #[test]
    fn ruled_grid_is_table() {
        let img = grid(600, 600, 60);
        let t = LayoutThresholds::default();
        let signals = measure(&img, &t).unwrap();
        assert!(signals.horizontal_lines >= 2, "{signals:?}");
        assert!(signals.vertical_lines >= 2, "{signals:?}");
        assert_eq!(classify(&img, &t), LayoutClass::Table);
    }

    #[test]
    fn speckled_page_is_noisy() {
        assert_eq!(classify(&speckle(800, 800), &LayoutThresholds::default()), LayoutClass::Noisy);
    }

    #[test]
    fn lines_without_regularity_are_not_table() {
        let t = LayoutThresholds::default();
        let s = LayoutSignals {
            line_density: 0.05,
            horizontal_lines: 5,
            vertical_lines: 0,
            ink_density: 0.05,
            edge_density: 0.02,
        };
        assert_eq!(decide(&s, &t), LayoutClass::Text);
    }

    #[test]
    fn decide_is_deterministic_on_literals() {
        let t = LayoutThresholds::default();
        let table = LayoutSignals {
            line_density: 0.02,
            horizontal_lines: 4,
            vertical_lines: 3,
            ink_density: 0.5,
            edge_density: 0.5,
        };
        assert_eq!(decide(&table, &t), LayoutClass::Table);
        let noisy = LayoutSignals {
            edge_density: 0.2,
            ..LayoutSignals::default()
        };
        assert_eq!(decide(&noisy, &t), LayoutClass::Noisy);
        assert_eq!(decide(&LayoutSignals::default(), &t), LayoutClass::Text);
    }

    #[test]
    fn ruling_line_bands_merge_adjacent_rows() {
        let img = grid(300, 300, 100);
        let lines = detect_ruling_lines(&img, 40);
        assert_eq!(lines.horizontal.len(), 3);
        assert_eq!(lines.horizontal[0], LineBand { start: 0, end: 1 });
        assert_eq!(lines.vertical.len(), 3);
    }
}
