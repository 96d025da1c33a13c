pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod frame;
pub mod models;
pub mod onnx_detector;
pub mod store;

pub use config::FirewatchConfig;
pub use detector::{
    create_detector, non_max_suppression, BoundingBox, Detection, DetectionClass, Detector,
    DetectorError, NullDetector, Thresholds,
};
pub use error::FirewatchError;
pub use frame::Frame;
pub use models::{
    DetectionLog, DetectionRecord, DetectionSession, DetectionSnapshot, SessionStatus, Statistics,
};
pub use onnx_detector::OnnxDetector;
