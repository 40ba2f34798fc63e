//! OCR engine boundary and text extraction.
//!
//! The engine itself is a collaborator behind [`OcrEngine`]; anything that
//! maps an image to (text, confidence, polygon) lines is interchangeable.
//! [`extract`] crops to a located region, runs the engine and normalizes its
//! output into [`TextCandidate`]s in source-image coordinates. An engine that
//! returns nothing, or fails outright, degrades to an empty candidate list.

use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgb};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use log::{debug, warn};

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use crate::error::PlateError;
use crate::locate::Located;
use crate::preprocess::{self, PreprocessConfig};
use crate::{Region, TextCandidate};

/// Engine invocation mode. Plate crops should bias single-line recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizeMode {
    SingleLine,
    FreeForm,
}

/// One recognized text line, as reported by the engine.
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
    /// Corner points in the coordinates of the image the engine was given.
    pub polygon: [(f32, f32); 4],
}

pub trait OcrEngine {
    fn recognize(
        &self,
        image: &DynamicImage,
        mode: RecognizeMode,
    ) -> Result<Vec<OcrLine>, PlateError>;
}

/// Crop to `located` (optionally masking pixels outside its quadrilateral
/// first), preprocess the crop, run the engine and map the resulting lines
/// back into source-image coordinates.
pub fn extract(
    engine: &dyn OcrEngine,
    image: &DynamicImage,
    located: Option<&Located>,
    config: &PreprocessConfig,
    mode: RecognizeMode,
    mask_to_polygon: bool,
) -> Vec<TextCandidate> {
    let (target, offset) = match located {
        Some(located) => {
            let region = located.region;
            let cropped = match (&located.polygon, mask_to_polygon) {
                (Some(polygon), true) => mask_outside_polygon(image, polygon)
                    .crop_imm(region.x, region.y, region.width, region.height),
                _ => image.crop_imm(region.x, region.y, region.width, region.height),
            };
            (cropped, (region.x, region.y))
        }
        None => (image.clone(), (0, 0)),
    };

    let prepared = DynamicImage::ImageLuma8(preprocess::preprocess(&target, config));
    let lines = match engine.recognize(&prepared, mode) {
        Ok(lines) => lines,
        Err(e) => {
            warn!("ocr engine failed, treating output as empty: {}", e);
            Vec::new()
        }
    };
    debug!("{} raw ocr lines", lines.len());

    let bounds = prepared.dimensions();
    lines
        .into_iter()
        .filter(|line| !line.text.trim().is_empty())
        .map(|line| {
            let bounding_box = polygon_bounds(&line.polygon, bounds)
                .map(|region| region.offset(offset))
                .unwrap_or(Region {
                    x: offset.0,
                    y: offset.1,
                    width: bounds.0,
                    height: bounds.1,
                });
            TextCandidate {
                text: line.text,
                confidence: line.confidence,
                bounding_box,
            }
        })
        .collect()
}

/// Black out everything outside the quadrilateral, so corner pixels beyond the
/// plate do not leak into the crop.
fn mask_outside_polygon(image: &DynamicImage, polygon: &[Point<i32>]) -> DynamicImage {
    if polygon.len() < 3 {
        return image.clone();
    }
    let mut polygon = polygon;
    // draw_polygon_mut rejects an explicitly closed point list
    if polygon.first() == polygon.last() {
        polygon = &polygon[..polygon.len() - 1];
    }

    let mut rgb = image.to_rgb8();
    let mut mask = GrayImage::new(rgb.width(), rgb.height());
    draw_polygon_mut(&mut mask, polygon, Luma([255u8]));
    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] == 0 {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    DynamicImage::ImageRgb8(rgb)
}

fn polygon_bounds(polygon: &[(f32, f32); 4], bounds: (u32, u32)) -> Option<Region> {
    let min_x = polygon.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let min_y = polygon.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_x = polygon.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = polygon.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
    if !min_x.is_finite() || !min_y.is_finite() || !max_x.is_finite() || !max_y.is_finite() {
        return None;
    }
    Region::clamped(
        min_x.floor() as i64,
        min_y.floor() as i64,
        max_x.ceil() as i64,
        max_y.ceil() as i64,
        bounds,
    )
}

/// Engine adapter that shells out to the `tesseract` executable and parses its
/// TSV output. Word rows are grouped back into lines with a mean confidence
/// and the union bounding box.
pub struct TesseractCli {
    command: PathBuf,
    lang: String,
}

impl TesseractCli {
    pub fn new() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
            lang: "chi_sim".to_string(),
        }
    }

    pub fn with_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(
        &self,
        image: &DynamicImage,
        mode: RecognizeMode,
    ) -> Result<Vec<OcrLine>, PlateError> {
        let path = std::env::temp_dir().join(format!("platefind_{}.png", std::process::id()));
        image.save(&path)?;

        let psm = match mode {
            RecognizeMode::SingleLine => "7",
            RecognizeMode::FreeForm => "3",
        };
        let output = Command::new(&self.command)
            .arg(&path)
            .arg("stdout")
            .args(&["--psm", psm, "-l", &self.lang, "tsv"])
            .output();
        let _ = fs::remove_file(&path);

        let output = output?;
        if !output.status.success() {
            return Err(PlateError::ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

// TSV columns: level page block par line word left top width height conf text
fn parse_tsv(tsv: &str) -> Vec<OcrLine> {
    struct LineAcc {
        key: (u32, u32, u32, u32),
        words: Vec<String>,
        confidence_sum: f32,
        word_count: u32,
        min_x: f32,
        min_y: f32,
        max_x: f32,
        max_y: f32,
    }

    fn index(field: &str) -> u32 {
        field.parse().unwrap_or(0)
    }

    let mut lines: Vec<LineAcc> = Vec::new();
    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        // level 5 rows are words; everything above is layout structure
        if index(fields[0]) != 5 {
            continue;
        }
        let confidence: f32 = fields[10].parse().unwrap_or(-1.0);
        if confidence < 0.0 {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        let key = (index(fields[1]), index(fields[2]), index(fields[3]), index(fields[4]));
        let left: f32 = fields[6].parse().unwrap_or(0.0);
        let top: f32 = fields[7].parse().unwrap_or(0.0);
        let width: f32 = fields[8].parse().unwrap_or(0.0);
        let height: f32 = fields[9].parse().unwrap_or(0.0);

        match lines.last_mut() {
            Some(acc) if acc.key == key => {
                acc.words.push(text.to_string());
                acc.confidence_sum += confidence;
                acc.word_count += 1;
                acc.min_x = acc.min_x.min(left);
                acc.min_y = acc.min_y.min(top);
                acc.max_x = acc.max_x.max(left + width);
                acc.max_y = acc.max_y.max(top + height);
            }
            _ => lines.push(LineAcc {
                key,
                words: vec![text.to_string()],
                confidence_sum: confidence,
                word_count: 1,
                min_x: left,
                min_y: top,
                max_x: left + width,
                max_y: top + height,
            }),
        }
    }

    lines
        .into_iter()
        .map(|acc| OcrLine {
            text: acc.words.join(" "),
            confidence: acc.confidence_sum / acc.word_count as f32 / 100.0,
            polygon: [
                (acc.min_x, acc.min_y),
                (acc.max_x, acc.min_y),
                (acc.max_x, acc.max_y),
                (acc.min_x, acc.max_y),
            ],
        })
        .collect()
}
