//! SCRFD face detector via ONNX Runtime.
//!
//! 3-stride anchor-free decoding with NMS. Input size and score threshold are
//! chosen per call so backoff retries never touch shared state.

use crate::error::{Result, SwapError};
use crate::face::BoundingBox;
use crate::face::Keypoints;
use crate::face_processor::face_analyser::DetectionConfig;
use crate::utils::process_img::load_session;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// Raw detection before recognition is attached.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub keypoints: Keypoints,
    pub score: f32,
}

struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

pub struct ScrfdDetector {
    session: Session,
    input_name: String,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = load_session(model_path, 4)?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.len() < 9 {
            return Err(SwapError::model_load(
                model_path.display().to_string(),
                format!(
                    "SCRFD needs 9 outputs (3 strides x score/bbox/kps), got {}",
                    output_names.len()
                ),
            ));
        }
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input.1".to_string());
        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_name,
            stride_indices,
        })
    }

    pub fn detect(&mut self, img: &RgbImage, config: &DetectionConfig) -> Result<Vec<Detection>> {
        // the largest stride must tile the input exactly
        let align = |v: u32| (v.max(1) as usize).div_ceil(32) * 32;
        let (input_w, input_h) = (align(config.size.0), align(config.size.1));
        let (input, letterbox) = preprocess(img, input_w, input_h);

        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;

        let mut all = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>()?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>()?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>()?;
            all.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                (input_w, input_h),
                &letterbox,
                config.threshold,
            ));
        }

        Ok(nms(all, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox into `input_w`×`input_h` (centred, padded with the mean) as an NCHW tensor.
fn preprocess(img: &RgbImage, input_w: usize, input_h: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (img.width() as f32, img.height() as f32);
    let scale = (input_w as f32 / width).min(input_h as f32 / height);
    let new_w = ((width * scale).round() as usize).clamp(1, input_w);
    let new_h = ((height * scale).round() as usize).clamp(1, input_h);
    let pad_x = ((input_w - new_w) / 2) as f32;
    let pad_y = ((input_h - new_h) / 2) as f32;

    let resized = imageops::resize(img, new_w as u32, new_h as u32, FilterType::Triangle);

    // pad value normalises to 0.0
    let mut tensor = Array4::<f32>::zeros((1, 3, input_h, input_w));
    let (px, py) = (pad_x as usize, pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, py + y as usize, px + x as usize]] =
                (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map outputs named `score_8`, `bbox_16`, ... to stride slots, falling back to
/// the standard positional layout `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) if v.len() == 3 => [v[0], v[1], v[2]],
        _ => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    (input_w, input_h): (usize, usize),
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let grid_w = input_w / stride;
    let grid_h = input_h / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let unmap = |x: f32, y: f32| {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score < threshold {
            continue;
        }
        let (Some(b), Some(k)) = (bboxes.get(idx * 4..idx * 4 + 4), kps.get(idx * 10..idx * 10 + 10))
        else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid_w) as f32 * s;
        let cy = (cell / grid_w) as f32 * s;

        let (x0, y0) = unmap(cx - b[0] * s, cy - b[1] * s);
        let (x1, y1) = unmap(cx + b[2] * s, cy + b[3] * s);
        let keypoints: Keypoints =
            std::array::from_fn(|i| unmap(cx + k[i * 2] * s, cy + k[i * 2 + 1] * s));

        detections.push(Detection {
            bbox: BoundingBox::new(x0, y0, x1, y1),
            keypoints,
            score,
        });
    }
    detections
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = (a.x1.min(b.x1) - a.x0.max(b.x0)).max(0.0);
    let inter_h = (a.y1.min(b.y1) - a.y0.max(b.y0)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn det(x0: f32, y0: f32, x1: f32, y1: f32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x0, y0, x1, y1),
            keypoints: [(0.0, 0.0); 5],
            score,
        }
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = nms(
            vec![
                det(5.0, 5.0, 105.0, 105.0, 0.8),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
                det(200.0, 200.0, 250.0, 250.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.7);
    }

    #[test]
    fn test_discover_named_outputs() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_preprocess_letterbox() {
        let img = RgbImage::from_pixel(320, 160, Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&img, 640, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.scale, 2.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
        // padding normalises to zero, image content does not
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!(tensor[[0, 0, 320, 320]] > 0.9);
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        let lb = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 160.0 };
        // 32x32 input, stride 32 => one cell, two anchors
        let scores = [0.9, 0.1];
        let bboxes = [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let kps = [0.5f32; 20];
        let dets = decode_stride(&scores, &bboxes, &kps, 32, (32, 32), &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.bbox, BoundingBox::new(-16.0, -96.0, 16.0, -64.0));
        assert_eq!(d.keypoints[0], (8.0, -72.0));
    }
}
