//! ONNX detection backend: local YOLO inference
//!
//! Uses the `ort` crate for ONNX Runtime. Expects a YOLOv8-style export with a
//! single `[1, 3, S, S]` input and a `[1, 4 + classes, anchors]` output
//! (`cx, cy, w, h` followed by per-class scores). The transposed layout
//! `[1, anchors, 4 + classes]` is accepted as well.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{ArrayView2, Axis};
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::detector::{
    non_max_suppression, BoundingBox, Detection, Detector, DetectorError, Thresholds,
};

const LETTERBOX_FILL: u8 = 114;
const BOX_PARAMS: usize = 4;

/// Local ONNX fire/smoke detector.
pub struct OnnxDetector {
    session: Arc<Mutex<Session>>,
    input_size: u32,
    num_classes: usize,
}

impl std::fmt::Debug for OnnxDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxDetector")
            .field("input_size", &self.input_size)
            .field("num_classes", &self.num_classes)
            .finish_non_exhaustive()
    }
}

impl OnnxDetector {
    /// Load the model from `model_path`.
    ///
    /// Returns `DetectorError::ModelNotFound` if the file is missing.
    pub fn new(
        model_path: PathBuf,
        input_size: u32,
        num_classes: usize,
    ) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound {
                path: model_path.display().to_string(),
            });
        }

        let threads = std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(1);

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| DetectorError::OnnxInference(e.to_string()))?;

        tracing::info!(
            model = %model_path.display(),
            input_size,
            num_classes,
            "ONNX detector loaded"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_size,
            num_classes,
        })
    }
}

#[async_trait]
impl Detector for OnnxDetector {
    async fn detect(
        &self,
        image: &RgbImage,
        thresholds: Thresholds,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, ratio) = letterbox(image, self.input_size);
        let frame_w = image.width() as f32;
        let frame_h = image.height() as f32;
        let size = self.input_size as i64;
        let num_classes = self.num_classes;
        let session = Arc::clone(&self.session);

        // Inference is CPU-bound: run on the blocking thread pool.
        tokio::task::spawn_blocking(move || {
            let mut session_guard = session.lock().map_err(|e| {
                DetectorError::OnnxInference(format!("session lock poisoned: {e}"))
            })?;

            let tensor = Tensor::from_array((vec![1i64, 3, size, size], input))
                .map_err(|e| DetectorError::OnnxInference(e.to_string()))?;

            let outputs = session_guard
                .run(ort::inputs![tensor])
                .map_err(|e| DetectorError::OnnxInference(e.to_string()))?;

            // try_extract_tensor returns (&Shape, &[f32])
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::OnnxInference(e.to_string()))?;

            let candidates = decode_output(shape, data, num_classes, thresholds.confidence)?;
            let scaled = candidates
                .into_iter()
                .map(|mut d| {
                    d.bbox = BoundingBox::new(
                        d.bbox.x1 / ratio,
                        d.bbox.y1 / ratio,
                        d.bbox.x2 / ratio,
                        d.bbox.y2 / ratio,
                    )
                    .clamp(frame_w, frame_h);
                    d
                })
                .collect();

            Ok(non_max_suppression(scaled, thresholds.iou))
        })
        .await
        .map_err(|e| DetectorError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Resize keeping aspect ratio, pad to `size x size` (image at top-left) and
/// return the NCHW tensor data in `[0, 1]` together with the scale ratio.
pub fn letterbox(image: &RgbImage, size: u32) -> (Vec<f32>, f32) {
    let (w, h) = image.dimensions();
    let ratio = (size as f32 / w.max(1) as f32).min(size as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * ratio).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * ratio).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, 0, 0);

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }
    (data, ratio)
}

/// Turn the raw model output into detections in model-input coordinates.
/// Anchors whose best class score is below `confidence` are dropped.
pub fn decode_output(
    shape: &[i64],
    data: &[f32],
    num_classes: usize,
    confidence: f32,
) -> Result<Vec<Detection>, DetectorError> {
    let features = BOX_PARAMS + num_classes;
    let bad_shape = || DetectorError::OutputShape {
        shape: shape.to_vec(),
    };

    if shape.len() != 3 || shape[0] != 1 {
        return Err(bad_shape());
    }
    let (d1, d2) = (shape[1] as usize, shape[2] as usize);

    // Normalise to [features, anchors]
    let view = if d1 == features {
        ArrayView2::from_shape((d1, d2), data).map_err(|_| bad_shape())?
    } else if d2 == features {
        ArrayView2::from_shape((d1, d2), data)
            .map_err(|_| bad_shape())?
            .reversed_axes()
    } else {
        return Err(bad_shape());
    };

    let mut out = Vec::new();
    for anchor in view.axis_iter(Axis(1)) {
        let scores = anchor.slice(ndarray::s![BOX_PARAMS..]);
        let Some((class_id, &score)) = scores
            .iter()
            .enumerate()
            .reduce(|best, x| if x.1 > best.1 { x } else { best })
        else {
            continue;
        };
        if score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        out.push(Detection {
            class_id,
            confidence: score,
            bbox: BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
        });
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found_returns_error() {
        let result = OnnxDetector::new(PathBuf::from("/nonexistent/fire.onnx"), 640, 4);
        match result {
            Err(DetectorError::ModelNotFound { path }) => {
                assert!(path.contains("nonexistent"), "path was: {path}");
            }
            other => panic!("Expected ModelNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn test_letterbox_shape_and_ratio() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 0, 0]));
        let (data, ratio) = letterbox(&image, 64);
        assert_eq!(data.len(), 3 * 64 * 64);
        assert!((ratio - 0.2).abs() < 1e-6);

        // top-left is image (red), bottom-right is padding (gray)
        let plane = 64 * 64;
        assert!((data[0] - 1.0).abs() < 1e-2);
        assert!(data[plane].abs() < 1e-3);
        let last = plane - 1;
        assert!((data[last] - 114.0 / 255.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_channels_first() {
        // 2 classes, 3 anchors: layout [1, 6, 3]
        #[rustfmt::skip]
        let data = vec![
            // cx
            50.0, 10.0, 30.0,
            // cy
            50.0, 10.0, 30.0,
            // w
            20.0, 4.0, 10.0,
            // h
            10.0, 4.0, 10.0,
            // class 0
            0.9, 0.1, 0.2,
            // class 1
            0.05, 0.3, 0.7,
        ];
        let dets = decode_output(&[1, 6, 3], &data, 2, 0.4).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].bbox, BoundingBox::new(40.0, 45.0, 60.0, 55.0));
        assert_eq!(dets[1].class_id, 1);
        assert!((dets[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_transposed_layout() {
        // 1 class, 2 anchors: layout [1, 2, 5]
        let data = vec![10.0, 10.0, 2.0, 2.0, 0.8, 0.0, 0.0, 1.0, 1.0, 0.1];
        let dets = decode_output(&[1, 2, 5], &data, 1, 0.4).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(9.0, 9.0, 11.0, 11.0));
    }

    #[test]
    fn test_decode_rejects_unexpected_shape() {
        let data = vec![0.0; 12];
        assert!(matches!(
            decode_output(&[1, 3, 4], &data, 4, 0.4),
            Err(DetectorError::OutputShape { .. })
        ));
        assert!(decode_output(&[12], &data, 4, 0.4).is_err());
    }
}
