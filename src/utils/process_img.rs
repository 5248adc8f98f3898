use crate::error::{Result, SwapError};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array3, Array4, ArrayView4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

/// Build an ONNX Runtime session, turning every failure into an actionable load error.
pub fn load_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let name = model_path.display().to_string();
    if !model_path.exists() {
        return Err(SwapError::model_load(
            &name,
            "model file not found, download it and place it in the model directory",
        ));
    }

    let session = Session::builder()
        .map_err(|e| SwapError::model_load(&name, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| SwapError::model_load(&name, e))?
        .with_intra_threads(intra_threads)
        .map_err(|e| SwapError::model_load(&name, e))?
        .commit_from_file(model_path)
        .map_err(|e| SwapError::model_load(&name, e))?;

    tracing::info!(path = %name, "loaded onnx model");
    Ok(session)
}

// NCHW blob: (pixel - mean) / std per channel, RGB order
pub fn blob_from_image(img: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Array4<f32> {
    let (w, h) = img.dimensions();
    let mut array = Array4::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - mean[c]) / std[c];
        }
    }

    array
}

/// Decode a `[1, 3, H, W]` tensor of values in `[0, 1]` into an RGB image.
///
/// Values are scaled by 255, clipped and truncated to 8 bits.
pub fn unit_tensor_to_image(tensor: ArrayView4<f32>) -> Result<RgbImage> {
    let (n, c, h, w) = tensor.dim();
    if n != 1 || c != 3 {
        return Err(SwapError::Inference(format!(
            "expected a [1, 3, H, W] tensor, got {:?}",
            tensor.shape()
        )));
    }

    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let px = |c: usize| (tensor[[0, c, y, x]] * 255.0).clamp(0.0, 255.0) as u8;
            img.put_pixel(x as u32, y as u32, Rgb([px(0), px(1), px(2)]));
        }
    }
    Ok(img)
}

/// RGB image as an `(H, W, 3)` float array.
pub fn image_to_array(img: &RgbImage) -> Array3<f32> {
    let (w, h) = img.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        img.get_pixel(x as u32, y as u32)[c] as f32
    })
}

/// `(H, W, 3)` float array back to RGB, rounding and clamping each channel.
pub fn array_to_image(array: &Array3<f32>) -> Result<RgbImage> {
    let (h, w, c) = array.dim();
    if c != 3 {
        return Err(SwapError::composite(format!(
            "expected 3 channels, got {c}"
        )));
    }
    let mut img = RgbImage::new(w as u32, h as u32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        *pixel = Rgb(std::array::from_fn(|c| to_u8(array[[y, x, c]])));
    }
    Ok(img)
}

#[inline]
pub fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn l2_normalize(v: &Array1<f32>) -> Array1<f32> {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 {
        v / norm
    } else {
        v.clone()
    }
}

/// `base * (1 - alpha) + overlay * alpha`, the visibility blend used after restoration.
pub fn blend_images(base: &RgbImage, overlay: &RgbImage, alpha: f32) -> Result<RgbImage> {
    if base.dimensions() != overlay.dimensions() {
        return Err(SwapError::composite(format!(
            "cannot blend {:?} with {:?}",
            base.dimensions(),
            overlay.dimensions()
        )));
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            dst[c] = to_u8(dst[c] as f32 * (1.0 - alpha) + src[c] as f32 * alpha);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_blob_normalization() {
        let img = RgbImage::from_pixel(4, 2, Rgb([255, 0, 128]));
        let blob = blob_from_image(&img, [0.0; 3], [255.0; 3]);
        assert_eq!(blob.shape(), &[1, 3, 2, 4]);
        assert!((blob[[0, 0, 1, 3]] - 1.0).abs() < 1e-6);
        assert_eq!(blob[[0, 1, 0, 0]], 0.0);
        assert!((blob[[0, 2, 0, 0]] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_tensor_clips() {
        let mut t = Array4::<f32>::zeros((1, 3, 1, 2));
        t[[0, 0, 0, 0]] = 2.0;
        t[[0, 1, 0, 1]] = -1.0;
        t[[0, 2, 0, 1]] = 0.5;
        let img = unit_tensor_to_image(t.view()).unwrap();
        assert_eq!(img.get_pixel(0, 0)[0], 255);
        assert_eq!(img.get_pixel(1, 0)[1], 0);
        assert_eq!(img.get_pixel(1, 0)[2], 127);
    }

    #[test]
    fn test_unit_tensor_rejects_wrong_shape() {
        let t = Array4::<f32>::zeros((1, 1, 2, 2));
        assert!(unit_tensor_to_image(t.view()).is_err());
    }

    #[test]
    fn test_image_array_roundtrip_is_exact() {
        let img = RgbImage::from_fn(5, 3, |x, y| Rgb([x as u8 * 40, y as u8 * 70, 9]));
        let back = array_to_image(&image_to_array(&img)).unwrap();
        assert_eq!(img, back);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&array![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let zero = l2_normalize(&array![0.0, 0.0]);
        assert_eq!(zero, array![0.0, 0.0]);
    }

    #[test]
    fn test_blend_images_visibility() {
        let a = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let b = RgbImage::from_pixel(2, 2, Rgb([200, 100, 50]));
        assert_eq!(blend_images(&a, &b, 1.0).unwrap(), b);
        assert_eq!(blend_images(&a, &b, 0.0).unwrap(), a);
        assert_eq!(blend_images(&a, &b, 0.5).unwrap().get_pixel(0, 0)[0], 100);
        assert!(blend_images(&a, &RgbImage::new(3, 2), 0.5).is_err());
    }
}
