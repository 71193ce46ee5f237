// THEORY:
// The `salience` module is the admission oracle for the tiling layer. Given a
// candidate region it answers one question: is there enough visual content
// here to be worth an identification call? Two cheap summary statistics stand
// in for "content":
//
// 1.  **Mean brightness**: the average luma of the region after grayscale
//     conversion. Near-black regions (wall shadow, dead space between
//     stickers) score close to zero and are filtered before any edge math
//     runs on them.
// 2.  **Edge mean**: the average response of a fixed 3x3 edge-detection
//     convolution over the grayscale region. Flat regions (bare wall, solid
//     paint) score near zero regardless of brightness; printed stickers and
//     logos produce strong local contrast and score high.
//
// Both metrics are deterministic for identical pixel data and have no side
// effects, which is what makes rerun determinism of the whole tiling stage
// possible.

use image::{GrayImage, RgbImage, imageops};

/// 3x3 edge-detection kernel (discrete Laplacian). Flat input produces a zero
/// response; the output is clipped to the u8 range before averaging so the
/// metric stays in [0, 255].
const EDGE_KERNEL: [[f64; 3]; 3] = [[-1.0, -1.0, -1.0], [-1.0, 8.0, -1.0], [-1.0, -1.0, -1.0]];

/// Salience summary for one candidate region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Salience {
    /// Average luma in [0, 255].
    pub mean_brightness: f64,
    /// Average clipped edge-convolution magnitude in [0, 255].
    pub edge_mean: f64,
}

/// Admission thresholds applied to every candidate tile.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub min_brightness: f64,
    pub min_edge_mean: f64,
}

impl Salience {
    /// A tile is admitted only when it clears both thresholds.
    pub fn admitted(&self, thresholds: &Thresholds) -> bool {
        self.mean_brightness >= thresholds.min_brightness
            && self.edge_mean >= thresholds.min_edge_mean
    }
}

/// Scores one region. Deterministic given identical pixel data.
pub fn score(region: &RgbImage) -> Salience {
    let gray = imageops::grayscale(region);
    Salience {
        mean_brightness: mean_luma(&gray),
        edge_mean: edge_mean(&gray),
    }
}

fn mean_luma(gray: &GrayImage) -> f64 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&v| u64::from(v)).sum();
    sum as f64 / pixels.len() as f64
}

/// Convolves the edge kernel over the grayscale region with border clamping
/// (edge pixels reuse their nearest in-bounds neighbors) and averages the
/// clipped per-pixel response.
fn edge_mean(gray: &GrayImage) -> f64 {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w == 0 || h == 0 {
        return 0.0;
    }

    let pixels = gray.as_raw();
    let mut sum = 0.0;
    for y in 0..h {
        let y_idx = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        for x in 0..w {
            let x_idx = [x.saturating_sub(1), x, (x + 1).min(w - 1)];
            let mut response = 0.0;
            for (ky, &yy) in y_idx.iter().enumerate() {
                let row = &pixels[yy * w..(yy + 1) * w];
                let kernel_row = &EDGE_KERNEL[ky];
                response += f64::from(row[x_idx[0]]) * kernel_row[0]
                    + f64::from(row[x_idx[1]]) * kernel_row[1]
                    + f64::from(row[x_idx[2]]) * kernel_row[2];
            }
            sum += response.clamp(0.0, 255.0);
        }
    }
    sum / (w * h) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn flat_image(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    fn checkerboard(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn flat_region_has_zero_edge_response() {
        let salience = score(&flat_image(16, 16, 128));
        assert_eq!(salience.edge_mean, 0.0);
        assert!((salience.mean_brightness - 128.0).abs() < 1.0);
    }

    #[test]
    fn black_region_scores_zero_on_both_axes() {
        let salience = score(&flat_image(8, 8, 0));
        assert_eq!(salience.mean_brightness, 0.0);
        assert_eq!(salience.edge_mean, 0.0);
    }

    #[test]
    fn high_contrast_region_scores_high_edge_mean() {
        let salience = score(&checkerboard(16, 16));
        assert!(salience.edge_mean > 100.0);
        assert!((salience.mean_brightness - 127.5).abs() < 8.0);
    }

    #[test]
    fn scoring_is_deterministic() {
        let img = checkerboard(20, 12);
        assert_eq!(score(&img), score(&img));
    }

    #[test]
    fn admission_requires_both_thresholds() {
        let thresholds = Thresholds {
            min_brightness: 8.0,
            min_edge_mean: 2.0,
        };
        let bright_flat = Salience {
            mean_brightness: 120.0,
            edge_mean: 0.0,
        };
        let dark_busy = Salience {
            mean_brightness: 3.0,
            edge_mean: 50.0,
        };
        let salient = Salience {
            mean_brightness: 120.0,
            edge_mean: 50.0,
        };
        assert!(!bright_flat.admitted(&thresholds));
        assert!(!dark_busy.admitted(&thresholds));
        assert!(salient.admitted(&thresholds));
    }

    #[test]
    fn boundary_values_are_admitted() {
        let thresholds = Thresholds {
            min_brightness: 8.0,
            min_edge_mean: 2.0,
        };
        let exact = Salience {
            mean_brightness: 8.0,
            edge_mean: 2.0,
        };
        assert!(exact.admitted(&thresholds));
    }
}
