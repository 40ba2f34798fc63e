//! License-plate localization and string-validation pipeline.
//!
//! Raw image -> preprocess -> locate -> extract -> validate -> [`PlateResult`].
//! The OCR engine is an external collaborator behind [`ocr::OcrEngine`]; the
//! pipeline owns everything around it: the image-transform chain, the plate
//! region heuristics and the plate-format rules. Every stage is a pure
//! function of its inputs, nothing is cached between invocations.

use image::DynamicImage;
use log::debug;

use std::fmt;
use std::path::Path;

pub mod error;
pub mod locate;
pub mod ocr;
pub mod preprocess;
pub mod validate;

pub use error::PlateError;
pub use locate::{ContourParams, Located, LocateStrategy};
pub use ocr::{OcrEngine, OcrLine, RecognizeMode, TesseractCli};
pub use preprocess::{
    Binarize, ContrastEnhance, Denoise, EdgeDetect, KernelShape, MorphOp, Morphology,
    PreprocessConfig,
};
pub use validate::ValidationMode;

// 省份简称，车牌首字符的封闭集合
pub const PROVINCE_PREFIXES: [char; 31] = [
    '京', '沪', '津', '渝', '冀', '晋', '蒙', '辽', '吉', '黑', '苏', '浙', '皖', '闽', '赣',
    '鲁', '豫', '鄂', '湘', '粤', '桂', '琼', '川', '贵', '云', '藏', '陕', '甘', '青', '宁',
    '新',
];

/// Axis-aligned rectangle in source-image pixel coordinates. Always non-empty
/// and fully inside the image it was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Build a region from corner coordinates, clamped to `bounds`. Returns
    /// `None` when the clamped rectangle is empty.
    pub fn clamped(x0: i64, y0: i64, x1: i64, y1: i64, bounds: (u32, u32)) -> Option<Region> {
        let (bound_w, bound_h) = bounds;
        let x0 = x0.max(0).min(bound_w as i64) as u32;
        let y0 = y0.max(0).min(bound_h as i64) as u32;
        let x1 = x1.max(0).min(bound_w as i64) as u32;
        let y1 = y1.max(0).min(bound_h as i64) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Region { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
    }

    pub fn offset(mut self, (dx, dy): (u32, u32)) -> Region {
        self.x += dx;
        self.y += dy;
        self
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// One raw OCR string with its confidence and position, prior to format
/// validation. Produced only by [`ocr::extract`].
#[derive(Debug, Clone)]
pub struct TextCandidate {
    pub text: String,
    pub confidence: f32,
    pub bounding_box: Region,
}

/// Terminal output of the pipeline.
#[derive(Debug, Clone)]
pub enum PlateResult {
    Recognized {
        plate: String,
        region: Region,
        confidence: f32,
    },
    /// "No plate found" is an ordinary outcome, not a fault. The raw OCR
    /// strings ride along for operator diagnosis.
    NotFound {
        reason: NotFoundReason,
        raw_texts: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    NoPlateRegion,
    NoOcrText,
    NoFormatMatch,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::NoPlateRegion => write!(f, "no plate region detected"),
            NotFoundReason::NoOcrText => write!(f, "ocr produced no text"),
            NotFoundReason::NoFormatMatch => {
                write!(f, "no plate-format string among OCR output")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub strategy: LocateStrategy,
    /// Transform chain applied to the full frame: the edge map for the contour
    /// locator, or the binarized frame handed to full-frame OCR.
    pub frame_preprocess: PreprocessConfig,
    /// Transform chain applied to the plate crop before single-line OCR. Only
    /// used by the contour strategy.
    pub plate_preprocess: PreprocessConfig,
    /// Black out pixels outside the located quadrilateral before cropping.
    pub mask_to_polygon: bool,
    pub ocr_mode: RecognizeMode,
    pub validation: ValidationMode,
}

impl PipelineConfig {
    /// Contour localization: gaussian + Canny frame, Otsu-binarized plate
    /// crop, single-line recognition.
    pub fn contour() -> Self {
        Self {
            strategy: LocateStrategy::Contour(ContourParams::default()),
            frame_preprocess: PreprocessConfig {
                denoise: Denoise::Gaussian { kernel_size: 5, sigma: 0.0 },
                edge_detect: Some(EdgeDetect { low: 100.0, high: 200.0 }),
                ..PreprocessConfig::default()
            },
            plate_preprocess: PreprocessConfig {
                binarize: Binarize::Otsu { invert: false },
                ..PreprocessConfig::default()
            },
            mask_to_polygon: false,
            ocr_mode: RecognizeMode::SingleLine,
            validation: ValidationMode::SelectMatches,
        }
    }

    /// OCR-line localization over a contrast-equalized, adaptively binarized
    /// frame. Suits low-contrast photos where plate edges are not cleanly
    /// separable.
    pub fn ocr_lines() -> Self {
        Self {
            strategy: LocateStrategy::OcrLines,
            frame_preprocess: PreprocessConfig {
                denoise: Denoise::Gaussian { kernel_size: 5, sigma: 0.0 },
                contrast: ContrastEnhance::Clahe { clip_limit: 2.0, tile_grid: (8, 8) },
                binarize: Binarize::AdaptiveGaussian { block_size: 11, c: 2 },
                ..PreprocessConfig::default()
            },
            plate_preprocess: PreprocessConfig::default(),
            mask_to_polygon: false,
            ocr_mode: RecognizeMode::FreeForm,
            validation: ValidationMode::SelectMatches,
        }
    }

    /// OCR-line localization over an inverted globally Otsu-binarized frame.
    pub fn full_frame_otsu() -> Self {
        Self {
            frame_preprocess: PreprocessConfig {
                binarize: Binarize::Otsu { invert: true },
                ..PreprocessConfig::default()
            },
            ..Self::ocr_lines()
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::contour()
    }
}

/// The whole recognition pipeline over a configured locator strategy and an
/// OCR engine. Single-threaded and synchronous; each call owns its buffers.
pub struct Pipeline<E> {
    engine: E,
    config: PipelineConfig,
}

impl<E: OcrEngine> Pipeline<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, PipelineConfig::default())
    }

    pub fn with_config(engine: E, config: PipelineConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Decode an image file and recognize its plate. A missing or undecodable
    /// file is the one failure reported as an error rather than `NotFound`,
    /// since it is a usage problem, not a recognition miss.
    pub fn recognize_file(&self, path: impl AsRef<Path>) -> Result<PlateResult, PlateError> {
        let image = image::open(path)?;
        Ok(self.recognize(&image))
    }

    /// Recognize the plate in a decoded image. Always yields a value:
    /// localization, extraction and validation failures all degrade to
    /// [`PlateResult::NotFound`].
    pub fn recognize(&self, image: &DynamicImage) -> PlateResult {
        match self.config.strategy {
            LocateStrategy::Contour(params) => {
                let edges = preprocess::preprocess(image, &self.config.frame_preprocess);
                let located = match locate::locate_by_contours(&edges, &params) {
                    Some(located) => located,
                    None => {
                        return PlateResult::NotFound {
                            reason: NotFoundReason::NoPlateRegion,
                            raw_texts: Vec::new(),
                        }
                    }
                };
                debug!("plate region located at {:?}", located.region);
                let candidates = ocr::extract(
                    &self.engine,
                    image,
                    Some(&located),
                    &self.config.plate_preprocess,
                    self.config.ocr_mode,
                    self.config.mask_to_polygon,
                );
                validate::validate(&candidates, self.config.validation)
            }
            LocateStrategy::OcrLines => {
                let candidates = ocr::extract(
                    &self.engine,
                    image,
                    None,
                    &self.config.frame_preprocess,
                    self.config.ocr_mode,
                    false,
                );
                if candidates.is_empty() {
                    return PlateResult::NotFound {
                        reason: NotFoundReason::NoOcrText,
                        raw_texts: Vec::new(),
                    };
                }
                match locate::locate_by_ocr_lines(&candidates) {
                    Some(region) => {
                        debug!("plate line located at {:?}", region);
                        validate::validate(&candidates, self.config.validation)
                    }
                    None => PlateResult::NotFound {
                        reason: NotFoundReason::NoPlateRegion,
                        raw_texts: candidates.into_iter().map(|c| c.text).collect(),
                    },
                }
            }
        }
    }
}
