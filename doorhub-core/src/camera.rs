//! Camera collaborator seam.
//!
//! Hardware SDK bindings live behind the [`Camera`] trait; the hub only ever
//! asks for wire-ready JPEG bytes. [`TestPatternCamera`] backs development
//! deployments and tests with a synthetic moving gradient.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Camera collaborator interface.
///
/// `start`/`stop` are only invoked from serialized state-machine transitions,
/// so implementations do not need to guard against concurrent power toggles.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Apply the capture resolution before the first start.
    async fn configure(&self, width: u32, height: u32) -> Result<()>;

    /// Power the sensor on.
    async fn start(&self) -> Result<()>;

    /// Power the sensor off.
    async fn stop(&self) -> Result<()>;

    /// Capture one wire-ready (JPEG) frame for the live stream.
    async fn capture_frame(&self) -> Result<Bytes>;

    /// Capture one encoded still for vision queries. Works independently of
    /// the streaming capture loop.
    async fn capture_snapshot(&self) -> Result<Bytes>;
}

/// Synthetic camera producing a moving-gradient JPEG each capture.
///
/// Stands in for the hardware SDK on development machines; every frame is
/// visually distinct so stream delivery problems are obvious.
pub struct TestPatternCamera {
    width: AtomicU64,
    height: AtomicU64,
    running: AtomicBool,
    tick: AtomicU64,
}

impl TestPatternCamera {
    #[must_use]
    pub fn new() -> Self {
        Self {
            width: AtomicU64::new(640),
            height: AtomicU64::new(480),
            running: AtomicBool::new(false),
            tick: AtomicU64::new(0),
        }
    }

    fn encode_pattern(&self, tick: u64) -> Result<Bytes> {
        let width = self.width.load(Ordering::Relaxed) as u32;
        let height = self.height.load(Ordering::Relaxed) as u32;
        let shift = (tick % 256) as u32;

        let img = image::GrayImage::from_fn(width, height, |x, y| {
            image::Luma([((x + y + shift) % 256) as u8])
        });

        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 75);
        encoder
            .encode_image(&img)
            .map_err(|e| Error::Camera(format!("JPEG encode failed: {e}")))?;
        Ok(Bytes::from(jpeg))
    }
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Camera for TestPatternCamera {
    async fn configure(&self, width: u32, height: u32) -> Result<()> {
        self.width.store(u64::from(width), Ordering::Relaxed);
        self.height.store(u64::from(height), Ordering::Relaxed);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn capture_frame(&self) -> Result<Bytes> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Camera("capture while sensor is off".to_string()));
        }
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        self.encode_pattern(tick)
    }

    async fn capture_snapshot(&self) -> Result<Bytes> {
        // Snapshots are allowed even when the stream capture is idle
        let tick = self.tick.load(Ordering::Relaxed);
        self.encode_pattern(tick)
    }
}
