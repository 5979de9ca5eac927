//! Background frame-capture loop.
//!
//! Pulls wire-ready frames from the camera collaborator at the target rate and
//! pushes them into the shared [`FrameBuffer`] while capture is enabled. While
//! disabled it parks on the enable signal, touching neither the camera nor the
//! CPU.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::camera::Camera;
use crate::frame::FrameBuffer;

pub struct CaptureLoop {
    camera: Arc<dyn Camera>,
    buffer: FrameBuffer,
    enabled: watch::Receiver<bool>,
    interval: Duration,
}

impl CaptureLoop {
    #[must_use]
    pub fn new(
        camera: Arc<dyn Camera>,
        buffer: FrameBuffer,
        enabled: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            camera,
            buffer,
            enabled,
            interval,
        }
    }

    /// Run until the enable signal's sender is dropped (process shutdown).
    ///
    /// A single failed capture is logged and skipped; the loop itself never
    /// gives up.
    pub async fn run(mut self) {
        loop {
            if self.enabled.has_changed().is_err() {
                debug!("Enable signal closed, capture loop exiting");
                return;
            }
            if !*self.enabled.borrow_and_update() {
                // Park until the state machine flips capture back on
                if self.enabled.changed().await.is_err() {
                    debug!("Enable signal closed, capture loop exiting");
                    return;
                }
                continue;
            }

            let tick_started = tokio::time::Instant::now();
            match self.camera.capture_frame().await {
                Ok(data) => self.buffer.write(data),
                Err(e) => warn!("Frame capture failed, skipping: {e}"),
            }

            tokio::time::sleep_until(tick_started + self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedCamera {
        captures: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl Camera for ScriptedCamera {
        async fn configure(&self, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn capture_frame(&self) -> Result<Bytes> {
            let n = self.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(n) {
                return Err(Error::Camera("sensor glitch".to_string()));
            }
            Ok(Bytes::from(format!("frame-{n}")))
        }
        async fn capture_snapshot(&self) -> Result<Bytes> {
            Ok(Bytes::from_static(b"snap"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_writes_frames_while_enabled() {
        let camera = Arc::new(ScriptedCamera {
            captures: AtomicUsize::new(0),
            fail_on: None,
        });
        let buffer = FrameBuffer::new();
        let (tx, rx) = watch::channel(true);

        let handle = tokio::spawn(
            CaptureLoop::new(camera, buffer.clone(), rx, Duration::from_millis(42)).run(),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(buffer.latest_seq() >= 3);

        drop(tx);
        handle.await.expect("capture loop panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_idles_while_disabled() {
        let camera = Arc::new(ScriptedCamera {
            captures: AtomicUsize::new(0),
            fail_on: None,
        });
        let buffer = FrameBuffer::new();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(CaptureLoop::new(
            camera.clone(),
            buffer.clone(),
            rx,
            Duration::from_millis(42),
        ).run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(camera.captures.load(Ordering::SeqCst), 0);
        assert_eq!(buffer.latest_seq(), 0);

        // Flip on: frames start flowing
        tx.send(true).expect("send enable");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(buffer.latest_seq() > 0);

        drop(tx);
        handle.await.expect("capture loop panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_is_skipped() {
        let camera = Arc::new(ScriptedCamera {
            captures: AtomicUsize::new(0),
            fail_on: Some(1),
        });
        let buffer = FrameBuffer::new();
        let (tx, rx) = watch::channel(true);

        let handle = tokio::spawn(
            CaptureLoop::new(camera, buffer.clone(), rx, Duration::from_millis(42)).run(),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        // Capture 1 failed but later captures kept landing
        assert!(buffer.latest_seq() >= 3);

        drop(tx);
        handle.await.expect("capture loop panicked");
    }
}
