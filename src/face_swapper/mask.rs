//! Seam masks for pasting a generated patch back into a frame.
//!
//! All masks are `(H, W)` float arrays in the 0..=255 range until the final
//! normalisation. Morphology and blur follow OpenCV conventions: erosion and
//! dilation ignore pixels outside the image, Gaussian blur reflects the border
//! without repeating the edge pixel.

use crate::error::{Result, SwapError};
use crate::face_processor::face_align::{invert_affine, transform_point, warp_affine, Affine};
use crate::utils::process_img::{image_to_array, to_u8};
use image::{GrayImage, Luma, RgbImage};
use ndarray::{s, Array2, Array3, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Warped values above this count as inside the patch.
const PRESENCE_THRESHOLD: f32 = 20.0;
/// Rows/columns zeroed on each side of a difference mask.
const DIFF_BORDER: usize = 2;
const DIFF_DILATION: usize = 2;

/// Which masks weigh the final blend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Eroded, feathered presence mask only.
    #[default]
    Presence,
    /// Presence mask multiplied by the feathered difference mask.
    PresenceAndDiff,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PasteParams {
    /// Difference sensitivity; changes below it are treated as unchanged.
    pub fthresh: f32,
    pub erosion_factor: f32,
    pub merge_mode: MergeMode,
}

impl Default for PasteParams {
    fn default() -> Self {
        Self {
            fthresh: 10.0,
            erosion_factor: 1.0,
            merge_mode: MergeMode::Presence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskKernels {
    pub erosion: usize,
    pub presence_blur: usize,
    pub diff_blur: usize,
}

/// Kernel sizes scaled by the valid region size and the erosion factor.
/// Blur sizes are always odd.
pub fn mask_kernels(mask_size: usize, erosion_factor: f32) -> MaskKernels {
    let ef = erosion_factor.max(0.0);
    let scaled = |base: usize, floor: f32| ((base as f32 * ef) as usize).max((floor * ef) as usize);
    MaskKernels {
        erosion: scaled(mask_size / 10, 10.0).max(1),
        presence_blur: 2 * scaled(mask_size / 20, 5.0) + 1,
        diff_blur: 2 * ((5.0 * ef) as usize) + 1,
    }
}

/// Mean absolute per-channel difference, with a 2px frame zeroed.
pub fn diff_mask(fake: &Array3<f32>, reference: &Array3<f32>) -> Result<Array2<f32>> {
    if fake.dim() != reference.dim() {
        return Err(SwapError::composite(format!(
            "cannot diff {:?} against {:?}",
            fake.dim(),
            reference.dim()
        )));
    }
    let channels = fake.dim().2.max(1) as f32;
    let mut diff = (fake - reference).mapv(f32::abs).sum_axis(Axis(2)) / channels;

    let (h, w) = diff.dim();
    let b = DIFF_BORDER;
    diff.slice_mut(s![..b.min(h), ..]).fill(0.0);
    diff.slice_mut(s![h.saturating_sub(b).., ..]).fill(0.0);
    diff.slice_mut(s![.., ..b.min(w)]).fill(0.0);
    diff.slice_mut(s![.., w.saturating_sub(b)..]).fill(0.0);
    Ok(diff)
}

/// Raise everything above the warp-noise floor to 255; faint edge values stay.
pub fn binarize_presence(mask: &mut Array2<f32>) {
    mask.mapv_inplace(|v| if v > PRESENCE_THRESHOLD { 255.0 } else { v });
}

pub fn binarize_diff(mask: &mut Array2<f32>, fthresh: f32) {
    mask.mapv_inplace(|v| if v < fthresh { 0.0 } else { 255.0 });
}

/// `sqrt(h * w)` of the bounding box of fully-set pixels, `None` if there are none.
pub fn valid_region_size(mask: &Array2<f32>) -> Option<usize> {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for ((y, x), &v) in mask.indexed_iter() {
        if v == 255.0 {
            bounds = Some(match bounds {
                None => (y, y, x, x),
                Some((y0, y1, x0, x1)) => (y0.min(y), y1.max(y), x0.min(x), x1.max(x)),
            });
        }
    }
    bounds.map(|(y0, y1, x0, x1)| (((y1 - y0) * (x1 - x0)) as f64).sqrt() as usize)
}

/// `k`x`k` minimum filter.
pub fn erode(mask: &Array2<f32>, k: usize) -> Array2<f32> {
    morph(mask, k, f32::min, f32::INFINITY)
}

/// `k`x`k` maximum filter.
pub fn dilate(mask: &Array2<f32>, k: usize) -> Array2<f32> {
    morph(mask, k, f32::max, f32::NEG_INFINITY)
}

fn morph(mask: &Array2<f32>, k: usize, op: fn(f32, f32) -> f32, identity: f32) -> Array2<f32> {
    if k <= 1 {
        return mask.clone();
    }
    let rows = morph_axis(mask.view(), k, op, identity, Axis(1));
    morph_axis(rows.view(), k, op, identity, Axis(0))
}

fn morph_axis(src: ArrayView2<f32>, k: usize, op: fn(f32, f32) -> f32, identity: f32, axis: Axis) -> Array2<f32> {
    let anchor = k / 2;
    let mut out = Array2::<f32>::zeros(src.dim());
    for (lane_in, mut lane_out) in src.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = lane_in.len();
        for i in 0..n {
            let lo = i.saturating_sub(anchor);
            let hi = (i + k - anchor).min(n);
            lane_out[i] = lane_in.slice(s![lo..hi]).fold(identity, |acc, &v| op(acc, v));
        }
    }
    out
}

/// Sigma OpenCV derives from a kernel size when none is given.
pub fn sigma_for_kernel(ksize: usize) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Kernel size OpenCV derives from sigma for 8-bit images.
pub fn kernel_for_sigma(sigma: f32) -> usize {
    ((sigma * 6.0 + 1.0).round() as usize) | 1
}

fn gaussian_kernel(ksize: usize, sigma: Option<f32>) -> Vec<f32> {
    // fixed small kernels used when sigma is derived from the size
    if sigma.is_none() {
        match ksize {
            1 => return vec![1.0],
            3 => return vec![0.25, 0.5, 0.25],
            5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
            7 => return vec![0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
            _ => {}
        }
    }
    let sigma = sigma.unwrap_or_else(|| sigma_for_kernel(ksize));
    let half = (ksize / 2) as f32;
    let weights: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

#[inline]
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * (n - 1) - i;
        } else {
            return i as usize;
        }
    }
}

fn convolve_axis(src: ArrayView2<f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let half = (kernel.len() / 2) as isize;
    let mut out = Array2::<f32>::zeros(src.dim());
    for (lane_in, mut lane_out) in src.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = lane_in.len();
        for i in 0..n {
            lane_out[i] = kernel
                .iter()
                .enumerate()
                .map(|(j, w)| w * lane_in[reflect_101(i as isize + j as isize - half, n)])
                .sum();
        }
    }
    out
}

/// Separable Gaussian blur with an odd `ksize`; `sigma = None` derives it from the size.
pub fn gaussian_blur(mask: &Array2<f32>, ksize: usize, sigma: Option<f32>) -> Array2<f32> {
    if ksize <= 1 || mask.is_empty() {
        return mask.clone();
    }
    let kernel = gaussian_kernel(ksize | 1, sigma);
    let rows = convolve_axis(mask.view(), &kernel, Axis(1));
    convolve_axis(rows.view(), &kernel, Axis(0))
}

pub fn gaussian_blur_image(img: &Array3<f32>, ksize: usize, sigma: Option<f32>) -> Array3<f32> {
    let mut out = img.clone();
    for (c, mut channel) in out.axis_iter_mut(Axis(2)).enumerate() {
        let blurred = gaussian_blur(&img.index_axis(Axis(2), c).to_owned(), ksize, sigma);
        channel.assign(&blurred);
    }
    out
}

/// `weight * fake + (1 - weight) * target` per pixel; `weight` is in `[0, 1]`.
pub fn merge_with_mask(fake: &Array3<f32>, target: &Array3<f32>, weight: &Array2<f32>) -> Result<Array3<f32>> {
    let (h, w, _) = fake.dim();
    if fake.dim() != target.dim() || weight.dim() != (h, w) {
        return Err(SwapError::composite(format!(
            "merge shapes differ: fake {:?}, target {:?}, weight {:?}",
            fake.dim(),
            target.dim(),
            weight.dim()
        )));
    }
    let weight = weight.view().insert_axis(Axis(2));
    let weight = weight.broadcast(fake.dim()).ok_or_else(|| SwapError::composite("cannot broadcast merge weight"))?;
    let mut out = Array3::<f32>::zeros(fake.dim());
    Zip::from(&mut out)
        .and(fake)
        .and(target)
        .and(&weight)
        .for_each(|o, &f, &t, &m| *o = m * f + (1.0 - m) * t);
    Ok(out)
}

/// Hard switch: `overlay` where `mask` is set, `base` elsewhere.
pub fn select_with_mask(base: &RgbImage, overlay: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
    if base.dimensions() != overlay.dimensions() || base.dimensions() != mask.dimensions() {
        return Err(SwapError::composite(format!(
            "mask merge needs equal sizes: {:?}, {:?}, {:?}",
            base.dimensions(),
            overlay.dimensions(),
            mask.dimensions()
        )));
    }
    Ok(RgbImage::from_fn(base.width(), base.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            *overlay.get_pixel(x, y)
        } else {
            *base.get_pixel(x, y)
        }
    }))
}

pub fn union_masks(a: &GrayImage, b: &GrayImage) -> Result<GrayImage> {
    if a.dimensions() != b.dimensions() {
        return Err(SwapError::composite(format!(
            "cannot union masks {:?} and {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    Ok(GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].max(b.get_pixel(x, y)[0])])
    }))
}

/// Axis-aligned window `[x0, x1) x [y0, y1)` of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Roi {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Roi {
    /// Bounds of `patch_size` mapped through `im`, grown by `margin` and clipped.
    fn around_patch(im: &Affine, patch_size: (u32, u32), margin: f32, frame: (u32, u32)) -> Option<Self> {
        let (pw, ph) = (patch_size.0 as f32, patch_size.1 as f32);
        let corners = [(0.0, 0.0), (pw, 0.0), (0.0, ph), (pw, ph)].map(|p| transform_point(im, p));
        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
        if ![min_x, max_x, min_y, max_y].iter().all(|v| v.is_finite()) {
            return None;
        }
        let clip = |v: f32, max: u32| v.clamp(0.0, max as f32) as u32;
        let roi = Self {
            x0: clip((min_x - margin).floor(), frame.0),
            y0: clip((min_y - margin).floor(), frame.1),
            x1: clip((max_x + margin).ceil(), frame.0),
            y1: clip((max_y + margin).ceil(), frame.1),
        };
        (roi.x1 > roi.x0 && roi.y1 > roi.y0).then_some(roi)
    }

    fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }
}

/// Warp `patch` back through the inverse of `m` and feather it into `target`.
///
/// `diff` is the per-pixel change mask in patch coordinates; it only affects
/// the result under [`MergeMode::PresenceAndDiff`].
pub fn paste_back(
    target: &RgbImage,
    patch: &RgbImage,
    diff: Option<&Array2<f32>>,
    m: &Affine,
    params: &PasteParams,
) -> Result<RgbImage> {
    let (pw, ph) = patch.dimensions();
    let im = invert_affine(m)?;

    // the valid region cannot exceed the mapped patch, so its kernels bound the reach
    let scale = (im[0] * im[4] - im[1] * im[3]).abs().sqrt();
    let upper_size = ((pw.max(ph) as f32) * scale * std::f32::consts::SQRT_2) as usize;
    let upper = mask_kernels(upper_size, params.erosion_factor);
    let margin = (upper.presence_blur.max(upper.diff_blur) / 2 + DIFF_DILATION + 2) as f32;

    let roi = Roi::around_patch(&im, (pw, ph), margin, target.dimensions())
        .ok_or_else(|| SwapError::composite("face patch maps outside the image"))?;
    let mut local = im;
    local[2] -= roi.x0 as f32;
    local[5] -= roi.y0 as f32;
    let (rw, rh) = (roi.width(), roi.height());

    let fake = warp_affine(&image_to_array(patch), &local, rw, rh)?;
    let white = Array3::<f32>::from_elem((ph as usize, pw as usize, 1), 255.0);
    let mut presence = warp_affine(&white, &local, rw, rh)?.index_axis_move(Axis(2), 0);
    binarize_presence(&mut presence);

    let mask_size = valid_region_size(&presence)
        .ok_or_else(|| SwapError::composite("warped face patch has no valid region"))?;
    let kernels = mask_kernels(mask_size, params.erosion_factor);
    tracing::debug!(mask_size, ?kernels, "paste-back masks");

    presence = erode(&presence, kernels.erosion);
    presence = gaussian_blur(&presence, kernels.presence_blur, None);
    presence /= 255.0;

    let weight = match (params.merge_mode, diff) {
        (MergeMode::PresenceAndDiff, Some(diff)) => {
            if diff.dim() != (ph as usize, pw as usize) {
                return Err(SwapError::composite(format!(
                    "difference mask {:?} does not match patch {:?}",
                    diff.dim(),
                    (ph, pw)
                )));
            }
            let diff3 = diff.view().insert_axis(Axis(2)).to_owned();
            let mut warped = warp_affine(&diff3, &local, rw, rh)?.index_axis_move(Axis(2), 0);
            binarize_diff(&mut warped, params.fthresh);
            warped = dilate(&warped, DIFF_DILATION);
            warped = gaussian_blur(&warped, kernels.diff_blur, None);
            warped /= 255.0;
            presence * warped
        }
        _ => presence,
    };

    let region = image_to_array(&image::imageops::crop_imm(target, roi.x0, roi.y0, rw as u32, rh as u32).to_image());
    let merged = merge_with_mask(&fake, &region, &weight)?;

    let mut out = target.clone();
    for ((y, x, c), &v) in merged.indexed_iter() {
        out.get_pixel_mut(roi.x0 + x as u32, roi.y0 + y as u32)[c] = to_u8(v);
    }
    Ok(out)
}
