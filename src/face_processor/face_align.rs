//! Face alignment via 4-DOF similarity transform and affine warping.
//!
//! Crops are normalised against the ArcFace reference landmarks; the forward
//! matrix is kept so a generated patch can be warped back into the frame.

use crate::error::{Result, SwapError};
use crate::face::Keypoints;
use crate::utils::process_img::{array_to_image, image_to_array};
use image::RgbImage;
use ndarray::Array3;

/// ArcFace reference landmarks for a 112×112 crop.
pub const ARCFACE_DST: Keypoints = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Row-major 2×3 affine matrix `[a, b, c, d, e, f]`:
/// ```text
/// x' = a*x + b*y + c
/// y' = d*x + e*y + f
/// ```
pub type Affine = [f32; 6];

/// Least-squares similarity transform (scale, rotation, translation) mapping `src` onto `dst`.
pub fn estimate_similarity_transform(src: &Keypoints, dst: &Keypoints) -> Affine {
    // Unknowns [p, q, tx, ty] with x' = p*x - q*y + tx, y' = q*x + p*y + ty
    let mut ata = [[0.0f64; 4]; 4];
    let mut atb = [0.0f64; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];
        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [p, q, tx, ty] = solve_4x4(ata, atb);
    [p as f32, -q as f32, tx as f32, q as f32, p as f32, ty as f32]
}

#[allow(clippy::needless_range_loop)]
fn solve_4x4(a: [[f64; 4]; 4], b: [f64; 4]) -> [f64; 4] {
    let mut m = [[0.0f64; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // degenerate landmarks (all points coincide)
            return [1.0, 0.0, 0.0, 0.0];
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Transform from image landmarks to a normalised `size`×`size` crop.
///
/// Sizes divisible by 112 scale the reference directly; other sizes use the
/// 128-based layout, which shifts the reference right by `8 * size / 128`.
pub fn estimate_norm(keypoints: &Keypoints, size: u32) -> Affine {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    let dst: Keypoints = ARCFACE_DST.map(|(x, y)| (x * ratio + diff_x, y * ratio));
    estimate_similarity_transform(keypoints, &dst)
}

/// Scale about `center` and move it to the middle of an `out_size` square crop.
pub fn center_crop_transform(center: (f32, f32), out_size: u32, scale: f32) -> Affine {
    let half = out_size as f32 / 2.0;
    [scale, 0.0, half - scale * center.0, 0.0, scale, half - scale * center.1]
}

pub fn invert_affine(m: &Affine) -> Result<Affine> {
    let [a, b, c, d, e, f] = *m;
    let det = a * e - b * d;
    if det.abs() < 1e-12 || !det.is_finite() {
        return Err(SwapError::composite(format!(
            "affine transform is not invertible: {m:?}"
        )));
    }
    Ok([
        e / det,
        -b / det,
        (b * f - c * e) / det,
        -d / det,
        a / det,
        (c * d - a * f) / det,
    ])
}

#[inline]
pub fn transform_point(m: &Affine, (x, y): (f32, f32)) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Warp an `(H, W, C)` array with `m` mapping source to destination coordinates.
///
/// Bilinear sampling; anything that falls outside the source is 0. Only the
/// destination area covered by the source is sampled.
pub fn warp_affine(src: &Array3<f32>, m: &Affine, out_w: usize, out_h: usize) -> Result<Array3<f32>> {
    let (src_h, src_w, channels) = src.dim();
    let inv = invert_affine(m)?;
    let mut out = Array3::<f32>::zeros((out_h, out_w, channels));
    if out_w == 0 || out_h == 0 || src_w == 0 || src_h == 0 {
        return Ok(out);
    }

    let corners = [
        (0.0, 0.0),
        (src_w as f32, 0.0),
        (0.0, src_h as f32),
        (src_w as f32, src_h as f32),
    ]
    .map(|p| transform_point(m, p));
    let clip = |v: f32, max: usize| (v.max(0.0) as usize).min(max);
    let x_lo = clip(corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).floor() - 1.0, out_w);
    let x_hi = clip(corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).ceil() + 2.0, out_w);
    let y_lo = clip(corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).floor() - 1.0, out_h);
    let y_hi = clip(corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).ceil() + 2.0, out_h);

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && y >= 0 && (x as usize) < src_w && (y as usize) < src_h {
            src[[y as usize, x as usize, c]]
        } else {
            0.0
        }
    };

    for oy in y_lo..y_hi {
        for ox in x_lo..x_hi {
            let (sx, sy) = transform_point(&inv, (ox as f32, oy as f32));
            if sx <= -1.0 || sy <= -1.0 || sx >= src_w as f32 || sy >= src_h as f32 {
                continue;
            }
            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;
            for c in 0..channels {
                out[[oy, ox, c]] = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
            }
        }
    }

    Ok(out)
}

pub fn warp_image(img: &RgbImage, m: &Affine, out_w: u32, out_h: u32) -> Result<RgbImage> {
    let warped = warp_affine(&image_to_array(img), m, out_w as usize, out_h as usize)?;
    array_to_image(&warped)
}

/// Aligned `size`×`size` crop around `keypoints` and the forward transform used.
pub fn norm_crop(img: &RgbImage, keypoints: &Keypoints, size: u32) -> Result<(RgbImage, Affine)> {
    let m = estimate_norm(keypoints, size);
    let crop = warp_image(img, &m, size, size)?;
    Ok((crop, m))
}
