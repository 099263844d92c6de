//! Screenshot preprocessing for OCR.
//!
//! Normalizes a raw capture into a single-channel bitmap that recognizers
//! read reliably across editor themes, fonts and contrast levels. Every
//! step is a pure transform and output dimensions always match the input:
//! the engines downstream are sensitive to scale, and upscaling buys
//! latency, not accuracy.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::adaptive_threshold;
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::close;

use crate::error::FrameError;

/// Tile grid for local contrast enhancement.
const CONTRAST_GRID: u32 = 8;
/// Histogram clip limit, as a multiple of the mean bin height.
const CONTRAST_CLIP_LIMIT: f32 = 2.0;
/// Local window radius for adaptive binarization (17px window).
const THRESHOLD_BLOCK_RADIUS: u32 = 8;

/// Decode raw screenshot bytes into a color bitmap.
///
/// Corrupt or truncated bytes fail the frame; the caller skips it without
/// retrying.
pub fn decode_frame(bytes: &[u8]) -> Result<DynamicImage, FrameError> {
    image::load_from_memory(bytes).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Full preprocessing pass: grayscale, local contrast enhancement,
/// edge-preserving denoise, adaptive binarization, then a light closing to
/// reconnect character strokes the thresholding severed.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    let contrasted = equalize_local_contrast(&gray, CONTRAST_GRID, CONTRAST_CLIP_LIMIT);
    let denoised = median_filter(&contrasted, 1, 1);
    let binary = adaptive_threshold(&denoised, THRESHOLD_BLOCK_RADIUS);
    reconnect_strokes(&binary)
}

/// Contrast-limited adaptive histogram equalization over a tile grid.
///
/// Low-contrast editor themes flatten the intensity range, and a global
/// equalization over-amplifies large uniform regions. Histograms are
/// clipped per tile and the per-tile mappings blended bilinearly between
/// tile centers.
fn equalize_local_contrast(image: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width < grid * 2 || height < grid * 2 {
        return image.clone();
    }

    let tile_w = (width + grid - 1) / grid;
    let tile_h = (height + grid - 1) / grid;

    // One clipped-histogram lookup table per tile.
    let mut luts = vec![[0u8; 256]; (grid * grid) as usize];
    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = (tx * tile_w).min(width);
            let y0 = (ty * tile_h).min(height);
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);
            luts[(ty * grid + tx) as usize] = build_clipped_lut(&hist, count, clip_limit);
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let (ty0, ty1, wy) = tile_axis(y, tile_h, grid);
        for x in 0..width {
            let (tx0, tx1, wx) = tile_axis(x, tile_w, grid);
            let value = image.get_pixel(x, y)[0] as usize;

            let tl = luts[(ty0 * grid + tx0) as usize][value] as f32;
            let tr = luts[(ty0 * grid + tx1) as usize][value] as f32;
            let bl = luts[(ty1 * grid + tx0) as usize][value] as f32;
            let br = luts[(ty1 * grid + tx1) as usize][value] as f32;

            let top = tl + (tr - tl) * wx;
            let bottom = bl + (br - bl) * wx;
            let blended = top + (bottom - top) * wy;
            out.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Clip a tile histogram, redistribute the excess, and fold it into a
/// CDF-based intensity mapping.
fn build_clipped_lut(hist: &[u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if count == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }

    let clip = ((clip_limit * count as f32 / 256.0).max(1.0)) as u32;
    let mut clipped = [0u32; 256];
    let mut excess = 0u32;
    for i in 0..256 {
        if hist[i] > clip {
            clipped[i] = clip;
            excess += hist[i] - clip;
        } else {
            clipped[i] = hist[i];
        }
    }

    let bonus = excess / 256;
    let mut remainder = excess % 256;
    for bin in clipped.iter_mut() {
        *bin += bonus;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }

    let mut cdf = 0u64;
    for i in 0..256 {
        cdf += clipped[i] as u64;
        lut[i] = ((cdf * 255) / count as u64).min(255) as u8;
    }
    lut
}

/// Neighboring tile indices and the blend weight along one axis.
fn tile_axis(coord: u32, tile_size: u32, tiles: u32) -> (u32, u32, f32) {
    let fractional = (coord as f32 - tile_size as f32 / 2.0) / tile_size as f32;
    let fractional = fractional.clamp(0.0, (tiles - 1) as f32);
    let t0 = fractional.floor() as u32;
    let t1 = (t0 + 1).min(tiles - 1);
    (t0, t1, fractional - t0 as f32)
}

/// Light morphological closing. Runs on the inverted bitmap so that text
/// strokes are the foreground, then restores the original polarity.
fn reconnect_strokes(binary: &GrayImage) -> GrayImage {
    let mut inverted = binary.clone();
    image::imageops::invert(&mut inverted);
    let mut closed = close(&inverted, Norm::LInf, 1);
    image::imageops::invert(&mut closed);
    closed
}
