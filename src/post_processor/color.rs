use image::{Rgb, RgbImage};
use palette::{FromColor, Lab, LinSrgb, Srgb};

// keeps a flat channel from dividing by zero
const MIN_STD: f32 = 1e-6;

/// Lab channel statistics of a reference image, used for Reinhard colour transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorProfile {
    /// `(mean, std)` of L, a and b.
    stats: [(f32, f32); 3],
}

impl ColorProfile {
    pub fn from_image(reference: &RgbImage) -> Self {
        Self {
            stats: channel_stats(&to_lab(reference)),
        }
    }

    /// Shift `image` so its Lab mean and spread match the reference.
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let lab = to_lab(image);
        let own = channel_stats(&lab);
        let adjust = |v: f32, c: usize| {
            let (src_mean, src_std) = own[c];
            let (dst_mean, dst_std) = self.stats[c];
            (v - src_mean) / src_std.max(MIN_STD) * dst_std.max(MIN_STD) + dst_mean
        };

        let mut out = RgbImage::new(image.width(), image.height());
        for (pixel, lab) in out.pixels_mut().zip(lab) {
            let adjusted: Lab = Lab::new(adjust(lab.l, 0), adjust(lab.a, 1), adjust(lab.b, 2));
            let rgb: Srgb<f32> = Srgb::from_color(adjusted);
            let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
            *pixel = Rgb([to_u8(rgb.red), to_u8(rgb.green), to_u8(rgb.blue)]);
        }
        out
    }
}

fn to_lab(image: &RgbImage) -> Vec<Lab> {
    image
        .pixels()
        .map(|p| {
            let rgb: LinSrgb<f32> = Srgb::new(p[0], p[1], p[2]).into_format::<f32>().into_linear();
            Lab::from_color(rgb)
        })
        .collect()
}

fn channel_stats(pixels: &[Lab]) -> [(f32, f32); 3] {
    let n = pixels.len().max(1) as f32;
    let channel = |get: fn(&Lab) -> f32| {
        let mean = pixels.iter().map(get).sum::<f32>() / n;
        let var = pixels.iter().map(|p| (get(p) - mean).powi(2)).sum::<f32>() / n;
        (mean, var.sqrt())
    };
    [channel(|p| p.l), channel(|p| p.a), channel(|p| p.b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &Rgb<u8>, b: &Rgb<u8>, tol: i32) -> bool {
        a.0.iter().zip(b.0.iter()).all(|(x, y)| (*x as i32 - *y as i32).abs() <= tol)
    }

    #[test]
    fn test_flat_image_takes_reference_colour() {
        let reference = RgbImage::from_pixel(4, 4, Rgb([180, 60, 40]));
        let image = RgbImage::from_pixel(4, 4, Rgb([20, 90, 200]));
        let out = ColorProfile::from_image(&reference).apply(&image);
        assert!(close(out.get_pixel(2, 2), &Rgb([180, 60, 40]), 2), "{:?}", out.get_pixel(2, 2));
    }

    #[test]
    fn test_self_profile_is_near_identity() {
        let image = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 15) as u8, (y * 15) as u8, 128]));
        let out = ColorProfile::from_image(&image).apply(&image);
        for (a, b) in image.pixels().zip(out.pixels()) {
            assert!(close(a, b, 2), "{a:?} vs {b:?}");
        }
    }
}
