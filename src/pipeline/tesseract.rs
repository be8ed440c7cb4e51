//! Tesseract command-line adapter for [`OcrEngine`].
//!
//! Each call writes the page image to a temporary PNG and runs one
//! `tesseract` process with TSV output, so concurrent page tasks never share
//! engine state. Orientation detection uses `--psm 0` and reads the `Rotate:`
//! line of the OSD report.

use crate::error::OcrError;
use crate::output::{BBox, Token};
use crate::pipeline::ocr::{OcrEngine, OcrOutput, RecognizeRequest};
use async_trait::async_trait;
use image::{GrayImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

static OSD_ROTATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Rotate:\s*(\d+)").expect("valid regex"));

/// LSTM engine.
const DEFAULT_OEM: u8 = 1;

pub struct TesseractEngine {
    binary: PathBuf,
    oem: u8,
    timeout: Duration,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            oem: DEFAULT_OEM,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_oem(mut self, oem: u8) -> Self {
        self.oem = oem;
        self
    }

    /// Whether the binary can be spawned at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn write_png(image: &GrayImage) -> Result<NamedTempFile, OcrError> {
        let file = tempfile::Builder::new()
            .prefix("pdfocr-")
            .suffix(".png")
            .tempfile()?;
        let path = file.path().to_path_buf();
        let owned = image.clone();
        tokio::task::spawn_blocking(move || owned.save_with_format(&path, ImageFormat::Png))
            .await
            .map_err(|e| OcrError::Failed(format!("PNG encode task failed: {e}")))??;
        Ok(file)
    }

    async fn run(&self, image_path: &Path, args: &[String]) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path).arg("stdout").args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(OcrError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::BackendNotAvailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary.display()
                )))
            }
            Ok(Err(e)) => return Err(OcrError::Io(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn common_args(request: &RecognizeRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(dir) = &request.tessdata_dir {
            args.push("--tessdata-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(
        &self,
        image: &GrayImage,
        request: &RecognizeRequest,
    ) -> Result<OcrOutput, OcrError> {
        let png = Self::write_png(image).await?;
        let mut args = Self::common_args(request);
        args.extend([
            "--oem".to_string(),
            self.oem.to_string(),
            "--psm".to_string(),
            request.segmentation_mode.to_string(),
            "-l".to_string(),
            request.language.clone(),
            "tsv".to_string(),
        ]);
        let tsv = self.run(png.path(), &args).await?;
        let output = parse_tsv(&tsv);
        debug!(
            psm = request.segmentation_mode,
            tokens = output.tokens.len(),
            "tesseract pass complete"
        );
        Ok(output)
    }

    async fn orientation(
        &self,
        image: &GrayImage,
        request: &RecognizeRequest,
    ) -> Result<u32, OcrError> {
        let png = Self::write_png(image).await?;
        let mut args = Self::common_args(request);
        args.extend(["--psm".to_string(), "0".to_string()]);
        let report = self.run(png.path(), &args).await?;
        Ok(parse_osd_rotation(&report).unwrap_or(0))
    }
}

/// Parse `tesseract ... tsv` output into text and word tokens.
///
/// Rows with a negative confidence (structural rows) or empty text are
/// skipped. Words are joined with spaces within a line and lines with `\n`.
pub fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut tokens = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(&str, &str, &str, &str)> = None;

    for row in tsv.lines() {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] == "level" {
            continue;
        }
        let text = cols[11..].join("\t");
        let text = text.trim();
        let confidence: f64 = match cols[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        if confidence < 0.0 || text.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);

        let key = (cols[1], cols[2], cols[3], cols[4]);
        match (current_key, lines.last_mut()) {
            (Some(k), Some(line)) if k == key => {
                line.push(' ');
                line.push_str(text);
            }
            _ => lines.push(text.to_string()),
        }
        current_key = Some(key);

        tokens.push(Token {
            text: text.to_string(),
            bbox: BBox {
                x: num(6),
                y: num(7),
                w: num(8),
                h: num(9),
            },
            confidence,
        });
    }

    OcrOutput {
        text: lines.join("\n"),
        tokens,
    }
}

/// Clockwise rotation from an OSD report.
pub fn parse_osd_rotation(report: &str) -> Option<u32> {
    OSD_ROTATE
        .captures(report)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2480\t3508\t-1\t
4\t1\t1\t1\t1\t0\t100\t200\t800\t40\t-1\t
5\t1\t1\t1\t1\t1\t100\t200\t120\t40\t96.5\tInvoice
5\t1\t1\t1\t1\t2\t240\t200\t90\t40\t91.0\tno.
5\t1\t1\t1\t1\t3\t340\t200\t60\t40\t95\t
5\t1\t1\t1\t2\t1\t100\t260\t200\t40\t88.25\tTotal:
5\t1\t1\t1\t2\t2\t320\t260\t100\t40\t97\t42.00
";

    #[test]
    fn tsv_groups_words_into_lines() {
        let out = parse_tsv(SAMPLE);
        assert_eq!(out.text, "Invoice no.\nTotal: 42.00");
        assert_eq!(out.tokens.len(), 4);
        assert_eq!(out.tokens[0].bbox, BBox { x: 100, y: 200, w: 120, h: 40 });
        assert_eq!(out.tokens[2].confidence, 88.25);
    }

    #[test]
    fn empty_tsv_is_empty_output() {
        let out = parse_tsv("level\tpage_num\n");
        assert!(out.text.is_empty());
        assert!(out.tokens.is_empty());
    }

    #[test]
    fn osd_rotation_is_parsed() {
        let report = "Page number: 0\nOrientation in degrees: 270\nRotate: 90\nOrientation confidence: 7.41\n";
        assert_eq!(parse_osd_rotation(report), Some(90));
        assert_eq!(parse_osd_rotation("garbage"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_backend_unavailable() {
        let engine = TesseractEngine::new().with_binary("/nonexistent/tesseract-binary");
        let request = RecognizeRequest {
            language: "eng".into(),
            segmentation_mode: 6,
            tessdata_dir: None,
        };
        let err = engine
            .recognize(&GrayImage::new(8, 8), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::BackendNotAvailable(_)), "got {err:?}");
        assert!(!engine.is_available().await);
    }
}
