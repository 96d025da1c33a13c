//! Frame sources
//!
//! - `FfmpegSource`: RTSP via an `ffmpeg` child process emitting MJPEG on
//!   stdout, split into JPEG images by `MjpegCodec`
//! - `SyntheticSource`: `stub://` URLs, solid test frames without a camera

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use firewatch_core::config::CameraConfig;
use firewatch_core::Frame;
use futures::StreamExt;
use image::{ImageFormat, Rgb, RgbImage};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::codec::{Decoder, FramedRead};

use super::capture::{CaptureError, FrameSource, FrameStream};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_JPEG_LEN: usize = 16 * 1024 * 1024;
const STUB_SCHEME: &str = "stub://";

/// Pick the source implementation for the configured URL.
pub fn create_source(config: &CameraConfig) -> Arc<dyn FrameSource> {
    if config.url.starts_with(STUB_SCHEME) {
        Arc::new(SyntheticSource::from_url(&config.url))
    } else {
        Arc::new(FfmpegSource::new(config))
    }
}

// ============================================================================
// MJPEG splitting
// ============================================================================

/// Splits a concatenated MJPEG byte stream into individual JPEG images.
///
/// Bytes before a start-of-image marker are discarded. Images larger than
/// the configured maximum are dropped and scanning resumes after their SOI.
#[derive(Debug)]
pub struct MjpegCodec {
    max_len: usize,
    /// Offset (relative to the current SOI) where the EOI search resumes.
    scan_from: usize,
}

impl MjpegCodec {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            scan_from: 0,
        }
    }
}

impl Default for MjpegCodec {
    fn default() -> Self {
        Self::new(MAX_JPEG_LEN)
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

impl Decoder for MjpegCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        loop {
            let Some(start) = find_marker(src, SOI) else {
                // A trailing 0xFF may be the first half of the next SOI.
                let keep = usize::from(src.last() == Some(&0xFF));
                src.advance(src.len() - keep);
                self.scan_from = 0;
                return Ok(None);
            };
            if start > 0 {
                src.advance(start);
                self.scan_from = 0;
            }

            let from = self.scan_from.max(SOI.len());
            if let Some(rel) = src.get(from..).and_then(|rest| find_marker(rest, EOI)) {
                let end = from + rel + EOI.len();
                self.scan_from = 0;
                return Ok(Some(src.split_to(end).freeze()));
            }

            if src.len() > self.max_len {
                tracing::warn!(len = src.len(), max = self.max_len, "Oversized JPEG dropped");
                src.advance(SOI.len());
                self.scan_from = 0;
                continue;
            }

            self.scan_from = src.len().saturating_sub(1);
            return Ok(None);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        let frame = self.decode(src)?;
        if frame.is_none() {
            // Truncated trailing image.
            src.clear();
            self.scan_from = 0;
        }
        Ok(frame)
    }
}

// ============================================================================
// FFmpeg / RTSP
// ============================================================================

#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffmpeg_path: String,
    url: String,
    fps: u32,
    read_timeout: Duration,
}

impl FfmpegSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            url: config.url.clone(),
            fps: config.target_fps.max(1),
            read_timeout: config.read_timeout(),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-nostdin", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if self.url.starts_with("rtsp://") {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        args.extend([
            "-i".to_string(),
            self.url.clone(),
            "-an".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            "5".to_string(),
            "-r".to_string(),
            self.fps.to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }

    fn open_error(&self, reason: impl Into<String>) -> CaptureError {
        CaptureError::Open {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.open_error(format!("spawn {}: {e}", self.ffmpeg_path)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.open_error("ffmpeg stdout not captured"))?;

        let mut stream = FfmpegStream {
            _child: child,
            frames: FramedRead::new(stdout, MjpegCodec::default()),
            read_timeout: self.read_timeout,
            pending: None,
        };

        // The stream counts as connected once the first image arrives.
        match stream.next_jpeg().await {
            Ok(Some(jpeg)) => {
                stream.pending = Some(jpeg);
                Ok(Box::new(stream))
            }
            Ok(None) => Err(self.open_error("no frame received")),
            Err(e) => Err(self.open_error(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        format!("ffmpeg {}", self.url)
    }
}

struct FfmpegStream {
    // killed on drop
    _child: Child,
    frames: FramedRead<ChildStdout, MjpegCodec>,
    read_timeout: Duration,
    pending: Option<Bytes>,
}

impl FfmpegStream {
    /// `Ok(None)` on timeout or when ffmpeg has exited.
    async fn next_jpeg(&mut self) -> Result<Option<Bytes>, CaptureError> {
        match tokio::time::timeout(self.read_timeout, self.frames.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Ok(None),
            Ok(Some(jpeg)) => Ok(Some(jpeg?)),
        }
    }
}

#[async_trait]
impl FrameStream for FfmpegStream {
    async fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let jpeg = match self.pending.take() {
            Some(jpeg) => jpeg,
            None => match self.next_jpeg().await? {
                Some(jpeg) => jpeg,
                None => return Ok(None),
            },
        };

        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).map(|img| img.to_rgb8())
        })
        .await
        .map_err(|e| CaptureError::Stream(format!("decode task failed: {e}")))?;

        match decoded {
            Ok(image) => Ok(Some(Frame::new(image))),
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable JPEG frame");
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Synthetic
// ============================================================================

/// `stub://[WIDTHxHEIGHT]`: solid gray frames of the given size
/// (640x480 by default).
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn from_url(url: &str) -> Self {
        let spec = url.trim_start_matches(STUB_SCHEME);
        let parsed = spec
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)));
        match parsed {
            Some((w, h)) if w > 0 && h > 0 => Self::new(w, h),
            _ => Self::new(640, 480),
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        Ok(Box::new(SyntheticStream {
            width: self.width,
            height: self.height,
            tick: 0,
        }))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    tick: u8,
}

#[async_trait]
impl FrameStream for SyntheticStream {
    async fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.tick = self.tick.wrapping_add(1);
        let shade = 64 + self.tick % 64;
        Ok(Some(Frame::new(RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb([shade, shade, shade]),
        ))))
    }
}

// ============================================================================
// TESTS
// ============================================================================
