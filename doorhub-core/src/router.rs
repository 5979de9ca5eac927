//! Inbound event routing.
//!
//! Hardware triggers (button, motion sensor) and decoded bus commands all
//! land here and are dispatched to state-machine actions or handed off to
//! spawned tasks. Nothing in the dispatch path blocks on external processes
//! or network calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{self, AudioPlayback};
use crate::bus::{topics, BusCommand, BusPublisher, PowerState};
use crate::camera::Camera;
use crate::config::OperatingMode;
use crate::control::{AutoStartOutcome, CaptureStateMachine};
use crate::vision::VisionClient;

/// Edge events delivered by the GPIO collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ButtonPressed,
    MotionDetected,
}

/// Minimum-interval gate for repeated triggers. A trigger arriving within
/// `window` of the previously accepted one is dropped.
pub struct CooldownGate {
    last: parking_lot::Mutex<Option<tokio::time::Instant>>,
    window: Duration,
}

impl CooldownGate {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            last: parking_lot::Mutex::new(None),
            window,
        }
    }

    /// Accept the trigger and arm the window, or reject it. Check and re-arm
    /// happen under one lock so concurrent triggers cannot both pass.
    pub fn try_accept(&self) -> bool {
        let now = tokio::time::Instant::now();
        let mut last = self.last.lock();
        match *last {
            Some(previous) if now.duration_since(previous) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Bell alert seam. Implementations must be non-blocking (fire-and-forget);
/// the production one shells out to ffplay on a spawned task.
pub trait AlertSounder: Send + Sync {
    fn play_alert(&self);
}

/// Plays the configured alert sound through ffplay.
pub struct FfplayAlert {
    sound_path: PathBuf,
}

impl FfplayAlert {
    #[must_use]
    pub fn new(sound_path: PathBuf) -> Self {
        Self { sound_path }
    }
}

impl AlertSounder for FfplayAlert {
    fn play_alert(&self) {
        let path = self.sound_path.clone();
        tokio::spawn(async move {
            if let Err(e) = audio::play_alert(&path).await {
                warn!("Bell alert playback failed: {e}");
            }
        });
    }
}

pub struct EventRouter {
    control: Arc<CaptureStateMachine>,
    publisher: Arc<dyn BusPublisher>,
    camera: Arc<dyn Camera>,
    playback: Arc<AudioPlayback>,
    vision: Option<Arc<VisionClient>>,
    alert: Arc<dyn AlertSounder>,
    bell_gate: CooldownGate,
    mode: OperatingMode,
    volume_step: u8,
}

impl EventRouter {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control: Arc<CaptureStateMachine>,
        publisher: Arc<dyn BusPublisher>,
        camera: Arc<dyn Camera>,
        playback: Arc<AudioPlayback>,
        vision: Option<Arc<VisionClient>>,
        alert: Arc<dyn AlertSounder>,
        mode: OperatingMode,
        bell_cooldown: Duration,
        volume_step: u8,
    ) -> Self {
        Self {
            control,
            publisher,
            camera,
            playback,
            vision,
            alert,
            bell_gate: CooldownGate::new(bell_cooldown),
            mode,
            volume_step,
        }
    }

    /// Consume hardware triggers until the sender side is dropped.
    pub async fn run_triggers(self: Arc<Self>, mut triggers: mpsc::Receiver<Trigger>) {
        while let Some(trigger) = triggers.recv().await {
            self.handle_trigger(trigger).await;
        }
        debug!("Trigger channel closed, router loop exiting");
    }

    pub async fn handle_trigger(&self, trigger: Trigger) {
        match trigger {
            Trigger::ButtonPressed => self.handle_button().await,
            Trigger::MotionDetected => self.handle_motion().await,
        }
    }

    async fn handle_button(&self) {
        if !self.bell_gate.try_accept() {
            info!("Bell on cooldown, ignoring press");
            return;
        }

        self.alert.play_alert();

        if self.mode == OperatingMode::Manual {
            if let Err(e) = self.control.request_start().await {
                warn!("Button-triggered start failed: {e}");
            }
        }
    }

    async fn handle_motion(&self) {
        if self.mode != OperatingMode::Motion {
            debug!("Motion event in manual mode, ignoring");
            return;
        }

        match self.control.try_auto_start().await {
            Ok(AutoStartOutcome::Started) => info!("Motion detected, capture started"),
            Ok(AutoStartOutcome::AlreadyOn) => debug!("Motion ignored, capture already on"),
            Ok(AutoStartOutcome::OverrideActive) => {
                info!("Motion ignored, override lock active");
            }
            Err(e) => warn!("Motion-triggered start failed: {e}"),
        }
    }

    /// Dispatch one decoded bus command. Long-running work (audio transcode,
    /// vision query, volume adjustment) is handed to spawned tasks so a slow
    /// external call cannot stall dispatch.
    pub async fn handle_command(&self, command: BusCommand) {
        match command {
            BusCommand::CameraPower(PowerState::On) => {
                if let Err(e) = self.control.request_start().await {
                    warn!("Remote camera start failed: {e}");
                }
            }
            BusCommand::CameraPower(PowerState::Off) => {
                if let Err(e) = self.control.request_stop().await {
                    warn!("Remote camera stop failed: {e}");
                }
            }
            BusCommand::Microphone(PowerState::On) => self.playback.start(),
            BusCommand::Microphone(PowerState::Off) => self.playback.stop(),
            BusCommand::AudioData(data) => {
                tokio::spawn(async move {
                    if let Err(e) = audio::transcode_and_play(&data).await {
                        warn!("Remote audio playback failed: {e}");
                    }
                });
            }
            BusCommand::Volume(direction) => {
                let step = self.volume_step;
                tokio::spawn(async move {
                    if let Err(e) = audio::change_volume(direction, step).await {
                        warn!("Volume change failed: {e}");
                    }
                });
            }
            BusCommand::VisionQuery => self.spawn_vision_query(),
        }
    }

    fn spawn_vision_query(&self) {
        let publisher = self.publisher.clone();
        let camera = self.camera.clone();
        let vision = self.vision.clone();

        tokio::spawn(async move {
            publisher.publish(
                topics::VISION_RESPONSE,
                "waiting for the AI to answer...".into(),
            );

            let Some(vision) = vision else {
                publisher.publish(
                    topics::VISION_RESPONSE,
                    "Vision API is not configured".into(),
                );
                return;
            };

            let result = match camera.capture_snapshot().await {
                Ok(snapshot) => vision.describe_scene(&snapshot).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(text) => {
                    info!("Vision query answered");
                    publisher.publish(topics::VISION_RESPONSE, text.into());
                }
                Err(e) => {
                    warn!("Vision query failed: {e}");
                    publisher.publish(
                        topics::VISION_RESPONSE,
                        format!("Vision query failed: {e}").into(),
                    );
                }
            }
        });
    }
}
