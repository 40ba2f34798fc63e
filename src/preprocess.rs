//! Deterministic image-transform chain that prepares a frame for plate
//! detection or OCR. Every stage produces a new buffer, so the same
//! configuration on the same input is bit-identical across runs.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::{box_filter, gaussian_blur_f32, median_filter};
use imageproc::morphology;

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub denoise: Denoise,
    pub contrast: ContrastEnhance,
    pub binarize: Binarize,
    pub morphology: Option<Morphology>,
    pub edge_detect: Option<EdgeDetect>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            denoise: Denoise::None,
            contrast: ContrastEnhance::None,
            binarize: Binarize::None,
            morphology: None,
            edge_detect: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Denoise {
    None,
    /// `sigma <= 0` derives sigma from the kernel size.
    Gaussian { kernel_size: u32, sigma: f32 },
    Median { kernel_size: u32 },
}

#[derive(Debug, Clone, Copy)]
pub enum ContrastEnhance {
    None,
    /// Clip-limited adaptive histogram equalization over a tile grid.
    Clahe { clip_limit: f32, tile_grid: (u32, u32) },
}

#[derive(Debug, Clone, Copy)]
pub enum Binarize {
    /// Pass-through, for configurations that binarize via the edge map instead.
    None,
    Otsu { invert: bool },
    Fixed { value: u8 },
    AdaptiveMean { block_size: u32, c: i16 },
    AdaptiveGaussian { block_size: u32, c: i16 },
}

#[derive(Debug, Clone, Copy)]
pub struct Morphology {
    pub op: MorphOp,
    pub kernel: KernelShape,
    pub kernel_size: u8,
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum MorphOp {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy)]
pub enum KernelShape {
    Square,
    Diamond,
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeDetect {
    pub low: f32,
    pub high: f32,
}

/// Run the configured stages in fixed order: grayscale, denoise, contrast,
/// binarize, morphology, edge detection.
pub fn preprocess(image: &DynamicImage, config: &PreprocessConfig) -> GrayImage {
    let mut gray = image.to_luma8();

    gray = match config.denoise {
        Denoise::None => gray,
        Denoise::Gaussian { kernel_size, sigma } => {
            gaussian_blur_f32(&gray, effective_sigma(kernel_size, sigma))
        }
        Denoise::Median { kernel_size } => {
            let radius = (kernel_size / 2).max(1);
            median_filter(&gray, radius, radius)
        }
    };

    if let ContrastEnhance::Clahe { clip_limit, tile_grid } = config.contrast {
        gray = clahe(&gray, clip_limit, tile_grid);
    }

    gray = match config.binarize {
        Binarize::None => gray,
        Binarize::Otsu { invert } => {
            let level = otsu_level(&gray);
            let mut binary = threshold(&gray, level);
            if invert {
                image::imageops::invert(&mut binary);
            }
            binary
        }
        Binarize::Fixed { value } => threshold(&gray, value),
        Binarize::AdaptiveMean { block_size, c } => {
            let radius = (block_size / 2).max(1);
            let local = box_filter(&gray, radius, radius);
            threshold_against(&gray, &local, c)
        }
        Binarize::AdaptiveGaussian { block_size, c } => {
            let local = gaussian_blur_f32(&gray, effective_sigma(block_size, 0.0));
            threshold_against(&gray, &local, c)
        }
    };

    if let Some(morph) = &config.morphology {
        let norm = match morph.kernel {
            KernelShape::Square => Norm::LInf,
            KernelShape::Diamond => Norm::L1,
        };
        // iterations follow the morphologyEx convention: erode n times then
        // dilate n times (and vice versa), not n repetitions of the compound
        // op, which would be idempotent
        let iterations = morph.iterations.max(1);
        let passes: [fn(&GrayImage, Norm, u8) -> GrayImage; 2] = match morph.op {
            MorphOp::Open => [morphology::erode, morphology::dilate],
            MorphOp::Close => [morphology::dilate, morphology::erode],
        };
        for pass in &passes {
            for _ in 0..iterations {
                gray = pass(&gray, norm, morph.kernel_size);
            }
        }
    }

    if let Some(edge) = &config.edge_detect {
        gray = canny(&gray, edge.low, edge.high);
    }

    gray
}

// 和 OpenCV 一样由核大小推出 sigma
fn effective_sigma(kernel_size: u32, sigma: f32) -> f32 {
    if sigma > 0.0 {
        sigma
    } else {
        (0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8).max(0.1)
    }
}

/// Binary threshold of each pixel against its local mean minus `c`. The local
/// image must have the same dimensions as the input.
fn threshold_against(image: &GrayImage, local: &GrayImage, c: i16) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y)[0] as i16;
        let mean = local.get_pixel(x, y)[0] as i16;
        if pixel > mean - c {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Clip-limited adaptive histogram equalization. Each tile gets its own
/// clipped CDF mapping; pixel values are bilinearly interpolated between the
/// four nearest tile mappings so tile borders stay invisible.
fn clahe(image: &GrayImage, clip_limit: f32, (tiles_x, tiles_y): (u32, u32)) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let tiles_x = tiles_x.max(1).min(width);
    let tiles_y = tiles_y.max(1).min(height);
    let tile_w = (width + tiles_x - 1) / tiles_x;
    let tile_h = (height + tiles_y - 1) / tiles_y;

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            clip_histogram(&mut hist, clip_limit, area);

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cumulative = 0u32;
            for value in 0..256 {
                cumulative += hist[value];
                lut[value] = (cumulative as f32 * 255.0 / area as f32).round() as u8;
            }
        }
    }

    let last_x = (tiles_x - 1) as f32;
    let last_y = (tiles_y - 1) as f32;
    GrayImage::from_fn(width, height, |x, y| {
        let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).max(0.0).min(last_x);
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).max(0.0).min(last_y);
        let tx0 = fx.floor() as u32;
        let ty0 = fy.floor() as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wx = fx - tx0 as f32;
        let wy = fy - ty0 as f32;

        let value = image.get_pixel(x, y)[0] as usize;
        let lut_at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
        let top = (1.0 - wx) * lut_at(tx0, ty0) + wx * lut_at(tx1, ty0);
        let bottom = (1.0 - wx) * lut_at(tx0, ty1) + wx * lut_at(tx1, ty1);
        Luma([((1.0 - wy) * top + wy * bottom).round() as u8])
    })
}

fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    if clip_limit <= 0.0 {
        return;
    }
    let clip = (clip_limit * area as f32 / 256.0).max(1.0) as u32;
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }
    // 把裁掉的部分均匀摊回各灰度级
    let per_bin = excess / 256;
    let mut leftover = excess % 256;
    for count in hist.iter_mut() {
        *count += per_bin;
        if leftover > 0 {
            *count += 1;
            leftover -= 1;
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn gradient_image() -> DynamicImage {
        let gray = GrayImage::from_fn(64, 48, |x, y| Luma([((x * 3 + y * 2) % 256) as u8]));
        DynamicImage::ImageLuma8(gray)
    }

    #[test]
    fn identical_config_is_bit_identical() {
        let image = gradient_image();
        let config = PreprocessConfig {
            denoise: Denoise::Gaussian { kernel_size: 5, sigma: 0.0 },
            contrast: ContrastEnhance::Clahe { clip_limit: 2.0, tile_grid: (4, 4) },
            binarize: Binarize::AdaptiveGaussian { block_size: 11, c: 2 },
            morphology: Some(Morphology {
                op: MorphOp::Close,
                kernel: KernelShape::Square,
                kernel_size: 1,
                iterations: 1,
            }),
            edge_detect: None,
        };
        let first = preprocess(&image, &config);
        let second = preprocess(&image, &config);
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn otsu_output_is_binary() {
        let image = gradient_image();
        let config = PreprocessConfig {
            binarize: Binarize::Otsu { invert: false },
            ..PreprocessConfig::default()
        };
        let binary = preprocess(&image, &config);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn otsu_invert_flips_every_pixel() {
        let image = gradient_image();
        let plain = preprocess(&image, &PreprocessConfig {
            binarize: Binarize::Otsu { invert: false },
            ..PreprocessConfig::default()
        });
        let inverted = preprocess(&image, &PreprocessConfig {
            binarize: Binarize::Otsu { invert: true },
            ..PreprocessConfig::default()
        });
        for (a, b) in plain.pixels().zip(inverted.pixels()) {
            assert_eq!(a[0], 255 - b[0]);
        }
    }

    #[test]
    fn adaptive_mean_separates_strokes_under_uneven_illumination() {
        // dark half: background 80 with a stroke at 40; bright half: 200 / 160.
        // A fixed global threshold cannot keep both strokes apart from their
        // backgrounds, the local mean can.
        let gray = GrayImage::from_fn(40, 40, |x, _| {
            Luma(match x {
                10 => [40u8],
                30 => [160u8],
                _ if x < 20 => [80u8],
                _ => [200u8],
            })
        });
        let image = DynamicImage::ImageLuma8(gray);

        let adaptive = preprocess(&image, &PreprocessConfig {
            binarize: Binarize::AdaptiveMean { block_size: 11, c: 5 },
            ..PreprocessConfig::default()
        });
        assert_eq!(adaptive.get_pixel(10, 20)[0], 0);
        assert_eq!(adaptive.get_pixel(30, 20)[0], 0);
        assert_eq!(adaptive.get_pixel(5, 20)[0], 255);
        assert_eq!(adaptive.get_pixel(35, 20)[0], 255);

        let fixed = preprocess(&image, &PreprocessConfig {
            binarize: Binarize::Fixed { value: 128 },
            ..PreprocessConfig::default()
        });
        // the dark-half stroke and its background collapse to the same value
        assert_eq!(fixed.get_pixel(10, 20)[0], fixed.get_pixel(5, 20)[0]);
    }

    #[test]
    fn median_denoise_removes_salt_noise() {
        let mut gray = GrayImage::from_pixel(16, 16, Luma([100u8]));
        gray.put_pixel(5, 5, Luma([255]));
        gray.put_pixel(12, 8, Luma([0]));
        let image = DynamicImage::ImageLuma8(gray);
        let config = PreprocessConfig {
            denoise: Denoise::Median { kernel_size: 3 },
            ..PreprocessConfig::default()
        };
        let smoothed = preprocess(&image, &config);
        assert_eq!(smoothed.dimensions(), (16, 16));
        // isolated outliers are replaced by the neighborhood median
        assert_eq!(smoothed.get_pixel(5, 5)[0], 100);
        assert_eq!(smoothed.get_pixel(12, 8)[0], 100);
        assert_eq!(smoothed.get_pixel(2, 2)[0], 100);
    }

    #[test]
    fn close_iterations_bridge_wider_gaps() {
        // white strip split by a 3px gap: one dilate/erode round restores the
        // gap, two rounds weld it shut
        let gap = |x: u32| (10..13).contains(&x);
        let strip = GrayImage::from_fn(24, 8, move |x, _| {
            if gap(x) { Luma([0u8]) } else { Luma([255u8]) }
        });
        let image = DynamicImage::ImageLuma8(strip);
        let close = |iterations: u32| PreprocessConfig {
            morphology: Some(Morphology {
                op: MorphOp::Close,
                kernel: KernelShape::Square,
                kernel_size: 1,
                iterations,
            }),
            ..PreprocessConfig::default()
        };
        let once = preprocess(&image, &close(1));
        let twice = preprocess(&image, &close(2));
        assert_eq!(once.get_pixel(11, 4)[0], 0);
        assert_eq!(twice.get_pixel(11, 4)[0], 255);
    }

    #[test]
    fn clahe_single_tile_matches_global_equalization() {
        // two-level image, no clipping: the CDF maps the dark half to 128 and
        // the bright half to 255
        let gray = GrayImage::from_fn(64, 64, |x, _| {
            Luma(if x < 32 { [100u8] } else { [150u8] })
        });
        let equalized = clahe(&gray, 200.0, (1, 1));
        assert_eq!(equalized.get_pixel(0, 0)[0], 128);
        assert_eq!(equalized.get_pixel(63, 0)[0], 255);
    }

    #[test]
    fn clahe_preserves_dimensions() {
        let gray = GrayImage::from_fn(50, 30, |x, y| Luma([(x + y) as u8]));
        let out = clahe(&gray, 2.0, (8, 8));
        assert_eq!(out.dimensions(), (50, 30));
    }
}
