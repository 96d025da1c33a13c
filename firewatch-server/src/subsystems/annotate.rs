//! Annotation stage: detect, count, draw, encode, record
//!
//! Runs once per frame pulled off the frame queue by a `/video` consumer:
//! 1. run the detector (errors skip the frame)
//! 2. keep only counted classes (`fire`, `smoke`) and tally them
//! 3. draw boxes and JPEG-encode the frame (always, change or not)
//! 4. if the counts changed: update the shared snapshot, log the change to
//!    the active session, record alerts, publish an event

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use firewatch_core::config::DetectorConfig;
use firewatch_core::{store, Detection, DetectionClass, Detector, Frame, Thresholds};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use sqlx::SqlitePool;
use thiserror::Error;

use super::overlay::Overlay;
use crate::state::{MonitorState, SnapshotChange};

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Annotation task failed: {0}")]
    Task(String),
}

/// Counted detections of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tally {
    pub fire: u32,
    pub smoke: u32,
    pub max_fire_confidence: Option<f32>,
    pub max_smoke_confidence: Option<f32>,
}

fn max_conf(current: Option<f32>, confidence: f32) -> Option<f32> {
    Some(current.map_or(confidence, |c| c.max(confidence)))
}

/// Keep `fire` and `smoke`; drop `light`, `no-fire` and unknown indices.
pub fn counted_detections(detections: &[Detection]) -> Vec<(DetectionClass, Detection)> {
    detections
        .iter()
        .filter_map(|d| d.class().filter(|c| c.is_counted()).map(|c| (c, *d)))
        .collect()
}

pub fn tally(counted: &[(DetectionClass, Detection)]) -> Tally {
    counted
        .iter()
        .fold(Tally::default(), |mut t, (class, detection)| {
            match class {
                DetectionClass::Fire => {
                    t.fire += 1;
                    t.max_fire_confidence = max_conf(t.max_fire_confidence, detection.confidence);
                }
                DetectionClass::Smoke => {
                    t.smoke += 1;
                    t.max_smoke_confidence = max_conf(t.max_smoke_confidence, detection.confidence);
                }
                DetectionClass::Light | DetectionClass::NoFire => {}
            }
            t
        })
}

pub struct Annotator {
    detector: Arc<dyn Detector>,
    thresholds: Thresholds,
    overlay: Overlay,
    jpeg_quality: u8,
    snapshot_dir: Option<PathBuf>,
}

impl Annotator {
    pub fn new(detector: Arc<dyn Detector>, config: &DetectorConfig) -> Self {
        Self {
            detector,
            thresholds: Thresholds::from(config),
            overlay: Overlay::from_config(config),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
            snapshot_dir: config.snapshot_dir.clone(),
        }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Process one frame. Returns the annotated JPEG, or `None` when the
    /// frame was skipped (empty frame or detector failure).
    pub async fn process(
        &self,
        frame: Frame,
        monitor: &MonitorState,
        pool: &SqlitePool,
    ) -> Result<Option<Bytes>, AnnotateError> {
        if frame.is_empty() {
            return Ok(None);
        }

        let detections = match self.detector.detect(&frame.image, self.thresholds).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(detector = self.detector.name(), error = %e, "Detection failed, frame skipped");
                return Ok(None);
            }
        };

        let counted = counted_detections(&detections);
        let tally = tally(&counted);
        let jpeg = self.render(frame.image, counted).await?;

        if let Some(change) = monitor.apply_counts(tally.fire, tally.smoke) {
            tracing::debug!(fire = tally.fire, smoke = tally.smoke, "Detection counts changed");
            self.record_change(&change, &tally, &jpeg, pool).await;
            monitor.events.publish(change.snapshot);
        }

        Ok(Some(jpeg))
    }

    async fn render(
        &self,
        mut image: RgbImage,
        counted: Vec<(DetectionClass, Detection)>,
    ) -> Result<Bytes, AnnotateError> {
        let overlay = self.overlay.clone();
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || -> Result<Bytes, AnnotateError> {
            overlay.draw(&mut image, &counted);
            let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
            JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&image)?;
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(|e| AnnotateError::Task(e.to_string()))?
    }

    /// Persist a snapshot change. Store failures are logged, never returned.
    async fn record_change(
        &self,
        change: &SnapshotChange,
        tally: &Tally,
        jpeg: &Bytes,
        pool: &SqlitePool,
    ) {
        let Some(session_id) = change.session_id else {
            return;
        };
        let alert = change.snapshot.is_alert();

        match store::add_detection_log(pool, session_id, tally.fire, tally.smoke, alert).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(session_id, "Session closed before log row was written");
                return;
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Failed to write detection log");
                return;
            }
        }

        if !alert {
            return;
        }

        let image_path = match &self.snapshot_dir {
            Some(dir) => save_snapshot(dir, jpeg).await,
            None => None,
        };
        let image_path = image_path.as_deref().and_then(Path::to_str);

        let records = [
            ("fire", tally.fire, tally.max_fire_confidence),
            ("smoke", tally.smoke, tally.max_smoke_confidence),
        ];
        for (kind, count, confidence) in records {
            if count == 0 {
                continue;
            }
            if let Err(e) = store::add_detection(pool, kind, count, confidence, image_path).await {
                tracing::error!(kind, error = %e, "Failed to record alert");
            }
        }
        tracing::info!(session_id, fire = tally.fire, smoke = tally.smoke, "Alert recorded");
    }
}

async fn save_snapshot(dir: &Path, jpeg: &Bytes) -> Option<PathBuf> {
    let path = dir.join(format!("alert_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S_%3f")));
    let written = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => tokio::fs::write(&path, jpeg).await,
        Err(e) => Err(e),
    };

    match written {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to save alert snapshot");
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
