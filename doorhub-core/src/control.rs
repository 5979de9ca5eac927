//! Capture state machine.
//!
//! Owns the camera power state, the manual-override lock used in motion mode,
//! and the single cancelable task that releases the lock. All transitions are
//! serialized behind one mutex so concurrent start/stop requests can never
//! leave the camera collaborator out of step with the recorded state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::bus::{topics, BusPublisher};
use crate::camera::Camera;
use crate::config::OperatingMode;
use crate::error::Result;

/// Whether the capture pipeline is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Off,
    On,
}

/// Outcome of a motion-triggered start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStartOutcome {
    Started,
    AlreadyOn,
    OverrideActive,
}

struct Inner {
    state: CaptureState,
    /// Set after a manual stop in motion mode; suppresses auto-reactivation
    override_armed: bool,
    /// At most one pending release task; re-arming replaces it
    reset_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct CaptureStateMachine {
    camera: Arc<dyn Camera>,
    publisher: Arc<dyn BusPublisher>,
    mode: OperatingMode,
    override_reset: Duration,
    enabled_tx: watch::Sender<bool>,
    inner: Arc<Mutex<Inner>>,
}

impl CaptureStateMachine {
    #[must_use]
    pub fn new(
        camera: Arc<dyn Camera>,
        publisher: Arc<dyn BusPublisher>,
        mode: OperatingMode,
        override_reset: Duration,
    ) -> Self {
        let (enabled_tx, _) = watch::channel(false);
        Self {
            camera,
            publisher,
            mode,
            override_reset,
            enabled_tx,
            inner: Arc::new(Mutex::new(Inner {
                state: CaptureState::Off,
                override_armed: false,
                reset_task: None,
            })),
        }
    }

    /// Signal consumed by the capture loop; `true` while capture is on.
    #[must_use]
    pub fn enabled_receiver(&self) -> watch::Receiver<bool> {
        self.enabled_tx.subscribe()
    }

    pub async fn state(&self) -> CaptureState {
        self.inner.lock().await.state
    }

    pub async fn is_override_armed(&self) -> bool {
        self.inner.lock().await.override_armed
    }

    /// Turn capture on. No-op when already on. In motion mode an explicit
    /// start also clears any armed override lock and cancels its release task.
    pub async fn request_start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    async fn start_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.state == CaptureState::On {
            debug!("Start requested while already on, ignoring");
            return Ok(());
        }

        self.camera.start().await?;
        inner.state = CaptureState::On;
        let _ = self.enabled_tx.send(true);
        self.publisher
            .publish(topics::LOCAL_CAMERA_STATE, "on".into());

        if self.mode == OperatingMode::Motion {
            inner.override_armed = false;
            if let Some(task) = inner.reset_task.take() {
                task.abort();
            }
        }

        info!("Capture started");
        Ok(())
    }

    /// Turn capture off. No-op when already off. In motion mode a manual stop
    /// arms the override lock and (re)schedules its release; an outstanding
    /// release task is replaced, never duplicated.
    pub async fn request_stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == CaptureState::Off {
            debug!("Stop requested while already off, ignoring");
            return Ok(());
        }

        self.camera.stop().await?;
        inner.state = CaptureState::Off;
        let _ = self.enabled_tx.send(false);
        self.publisher
            .publish(topics::LOCAL_CAMERA_STATE, "off".into());

        if self.mode == OperatingMode::Motion {
            inner.override_armed = true;
            if let Some(task) = inner.reset_task.take() {
                task.abort();
            }
            inner.reset_task = Some(self.spawn_override_release());
            info!(
                release_in_seconds = self.override_reset.as_secs(),
                "Capture stopped, override lock armed"
            );
        } else {
            info!("Capture stopped");
        }

        Ok(())
    }

    /// Motion-triggered start: only succeeds while capture is off and the
    /// override lock is inactive. The check and the transition happen under
    /// the same lock, so a concurrent stop cannot slip in between.
    pub async fn try_auto_start(&self) -> Result<AutoStartOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.state == CaptureState::On {
            return Ok(AutoStartOutcome::AlreadyOn);
        }
        if inner.override_armed {
            return Ok(AutoStartOutcome::OverrideActive);
        }
        self.start_locked(&mut inner).await?;
        Ok(AutoStartOutcome::Started)
    }

    fn spawn_override_release(&self) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let deadline = tokio::time::Instant::now() + self.override_reset;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = inner.lock().await;
            if inner.override_armed {
                inner.override_armed = false;
                info!("Override lock released");
            }
            inner.reset_task = None;
        })
    }

    /// Cancel any pending override-release task (process shutdown).
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.reset_task.take() {
            task.abort();
        }
        if inner.state == CaptureState::On {
            if let Err(e) = self.camera.stop().await {
                warn!("Failed to stop camera during shutdown: {e}");
            }
            inner.state = CaptureState::Off;
            let _ = self.enabled_tx.send(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCamera {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CountingCamera {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Camera for CountingCamera {
        async fn configure(&self, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn capture_frame(&self) -> Result<Bytes> {
            Ok(Bytes::from_static(b"frame"))
        }
        async fn capture_snapshot(&self) -> Result<Bytes> {
            Ok(Bytes::from_static(b"snap"))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: PlMutex<Vec<(String, Bytes)>>,
    }

    impl BusPublisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: Bytes) {
            self.published.lock().push((topic.to_string(), payload));
        }
    }

    fn machine(mode: OperatingMode) -> (Arc<CaptureStateMachine>, Arc<CountingCamera>) {
        let camera = CountingCamera::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let machine = Arc::new(CaptureStateMachine::new(
            camera.clone(),
            publisher,
            mode,
            Duration::from_secs(60),
        ));
        (machine, camera)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (machine, camera) = machine(OperatingMode::Manual);

        machine.request_start().await.expect("start");
        machine.request_start().await.expect("second start");

        assert_eq!(machine.state().await, CaptureState::On);
        assert_eq!(camera.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (machine, camera) = machine(OperatingMode::Manual);

        machine.request_stop().await.expect("stop while off");
        assert_eq!(camera.stops.load(Ordering::SeqCst), 0);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");
        machine.request_stop().await.expect("second stop");
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_mode_never_arms_override() {
        let (machine, _) = machine(OperatingMode::Manual);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");
        assert!(!machine.is_override_armed().await);
    }

    #[tokio::test]
    async fn test_stop_in_motion_mode_arms_override() {
        let (machine, _) = machine(OperatingMode::Motion);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");
        assert!(machine.is_override_armed().await);
    }

    #[tokio::test]
    async fn test_explicit_start_clears_override() {
        let (machine, _) = machine(OperatingMode::Motion);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");
        assert!(machine.is_override_armed().await);

        machine.request_start().await.expect("restart");
        assert!(!machine.is_override_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_releases_after_delay() {
        let (machine, _) = machine(OperatingMode::Motion);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");
        assert!(machine.is_override_armed().await);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(machine.is_override_armed().await);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!machine.is_override_armed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_replaces_pending_release() {
        let (machine, _) = machine(OperatingMode::Motion);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");

        // Stop again 30s in: the release task must be replaced, so the lock
        // survives past the original 60s mark.
        tokio::time::advance(Duration::from_secs(30)).await;
        machine.request_start().await.expect("restart");
        machine.request_stop().await.expect("second stop");

        tokio::time::advance(Duration::from_secs(35)).await;
        tokio::task::yield_now().await;
        assert!(machine.is_override_armed().await);

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(!machine.is_override_armed().await);
    }

    #[tokio::test]
    async fn test_auto_start_respects_override() {
        let (machine, camera) = machine(OperatingMode::Motion);

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");

        let outcome = machine.try_auto_start().await.expect("auto start");
        assert_eq!(outcome, AutoStartOutcome::OverrideActive);
        assert_eq!(camera.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_start_while_idle() {
        let (machine, _) = machine(OperatingMode::Motion);

        let outcome = machine.try_auto_start().await.expect("auto start");
        assert_eq!(outcome, AutoStartOutcome::Started);
        assert_eq!(machine.state().await, CaptureState::On);

        let again = machine.try_auto_start().await.expect("auto start again");
        assert_eq!(again, AutoStartOutcome::AlreadyOn);
    }

    #[tokio::test]
    async fn test_state_change_is_published() {
        let camera = CountingCamera::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let machine = CaptureStateMachine::new(
            camera,
            publisher.clone(),
            OperatingMode::Manual,
            Duration::from_secs(60),
        );

        machine.request_start().await.expect("start");
        machine.request_stop().await.expect("stop");

        let published = publisher.published.lock();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, topics::LOCAL_CAMERA_STATE);
        assert_eq!(published[0].1, Bytes::from_static(b"on"));
        assert_eq!(published[1].1, Bytes::from_static(b"off"));
    }
}
