//! Detector abstraction for Firewatch: fire/smoke object detection
//!
//! Provides a `Detector` trait with implementations for:
//! - **ONNX**: local YOLO-style model via ONNX Runtime (`onnx_detector`)
//! - **None**: stream-only mode, never reports anything
//!
//! The detector is a black box to the rest of the system: it takes a decoded
//! RGB frame plus thresholds and returns class-indexed boxes in frame
//! coordinates. Classification into counted/ignored classes happens in
//! `DetectionClass`.

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::DetectorConfig;

// ============================================================================
// Detector trait
// ============================================================================

/// Abstraction over object-detection backends.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run detection on one frame. Returned boxes are already filtered by
    /// `thresholds.confidence` and de-duplicated with NMS at `thresholds.iou`.
    async fn detect(
        &self,
        image: &RgbImage,
        thresholds: Thresholds,
    ) -> Result<Vec<Detection>, DetectorError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            iou: 0.45,
        }
    }
}

impl From<&DetectorConfig> for Thresholds {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            confidence: config.confidence,
            iou: config.iou,
        }
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let l = self.x1.max(other.x1);
        let t = self.y1.max(other.y1);
        let r = self.x2.min(other.x2);
        let b = self.y2.min(other.y2);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp into `[0, width] x [0, height]`.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Raw class index as emitted by the model.
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn class(&self) -> Option<DetectionClass> {
        DetectionClass::from_index(self.class_id)
    }
}

/// The four classes of the fire model, in model index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionClass {
    Fire,
    Light,
    NoFire,
    Smoke,
}

impl DetectionClass {
    pub const ALL: [DetectionClass; 4] = [
        DetectionClass::Fire,
        DetectionClass::Light,
        DetectionClass::NoFire,
        DetectionClass::Smoke,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        match self {
            DetectionClass::Fire => 0,
            DetectionClass::Light => 1,
            DetectionClass::NoFire => 2,
            DetectionClass::Smoke => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DetectionClass::Fire => "fire",
            DetectionClass::Light => "light",
            DetectionClass::NoFire => "no-fire",
            DetectionClass::Smoke => "smoke",
        }
    }

    /// Benign light sources and explicit "no fire" never count or alert.
    pub fn is_counted(&self) -> bool {
        matches!(self, DetectionClass::Fire | DetectionClass::Smoke)
    }

    /// Overlay colour (RGB).
    pub fn color(&self) -> [u8; 3] {
        match self {
            DetectionClass::Fire => [255, 0, 0],
            DetectionClass::Light => [255, 255, 0],
            DetectionClass::NoFire => [0, 255, 0],
            DetectionClass::Smoke => [128, 128, 128],
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("ONNX model not found at {path}")]
    ModelNotFound { path: String },

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Unexpected model output shape {shape:?}")]
    OutputShape { shape: Vec<i64> },

    #[error("Unknown detector backend '{0}'")]
    UnknownBackend(String),
}

// ============================================================================
// Null backend
// ============================================================================

/// Backend used when no model is configured: frames stream through untouched.
#[derive(Debug, Default, Clone)]
pub struct NullDetector;

#[async_trait]
impl Detector for NullDetector {
    async fn detect(
        &self,
        _image: &RgbImage,
        _thresholds: Thresholds,
    ) -> Result<Vec<Detection>, DetectorError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Create the configured backend.
pub fn create_detector(config: &DetectorConfig) -> Result<Box<dyn Detector>, DetectorError> {
    match config.backend.as_str() {
        "onnx" => Ok(Box::new(crate::onnx_detector::OnnxDetector::new(
            PathBuf::from(&config.model_path),
            config.input_size,
            config.labels.len(),
        )?)),
        "none" => Ok(Box::new(NullDetector)),
        other => Err(DetectorError::UnknownBackend(other.to_string())),
    }
}

// ============================================================================
// Post-processing
// ============================================================================

/// Greedy per-class non-maximum suppression. Keeps the highest-confidence
/// box of every overlapping group whose IoU exceeds `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

// ============================================================================
// TESTS
// ============================================================================
