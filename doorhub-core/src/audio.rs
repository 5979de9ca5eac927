//! Audio collaborators: bell alert playback, remote-audio transcode+play, and
//! PulseAudio volume control. Everything here shells out to external tools via
//! `tokio::process`; failures are logged by the callers and never crash the
//! process.

use bytes::Bytes;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::bus::{topics, BusPublisher, VolumeDirection};
use crate::error::{Error, Result};

/// Play the doorbell alert sound once.
pub async fn play_alert(sound_path: &Path) -> Result<()> {
    let status = Command::new("ffplay")
        .arg("-nodisp")
        .arg("-autoexit")
        .arg(sound_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        debug!("Bell alert played");
        Ok(())
    } else {
        Err(Error::Audio(format!("ffplay exited with {status}")))
    }
}

/// Convert a received audio blob (webm) to WAV and play it on the local
/// speaker. Scratch files live in a temporary directory that is removed when
/// the call returns.
pub async fn transcode_and_play(data: &[u8]) -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let raw_path = scratch.path().join("incoming.webm");
    let wav_path = scratch.path().join("incoming.wav");

    tokio::fs::write(&raw_path, data).await?;

    let convert = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(&raw_path)
        .arg(&wav_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !convert.success() {
        return Err(Error::Audio(format!("ffmpeg exited with {convert}")));
    }

    let play = Command::new("aplay").arg(&wav_path).status().await?;
    if !play.success() {
        return Err(Error::Audio(format!("aplay exited with {play}")));
    }

    debug!("Remote audio blob played");
    Ok(())
}

/// Door-microphone streamer. The capture pipeline itself is an external
/// collaborator; it hands captured frames to [`AudioPlayback::publish_frame`],
/// which forwards them to the remote app on the audio response topic while
/// listening is switched on.
pub struct AudioPlayback {
    active: AtomicBool,
    publisher: Arc<dyn BusPublisher>,
}

impl AudioPlayback {
    #[must_use]
    pub fn new(publisher: Arc<dyn BusPublisher>) -> Self {
        Self {
            active: AtomicBool::new(false),
            publisher,
        }
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!("Microphone playback enabled");
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("Microphone playback disabled");
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Forward one captured microphone frame to the remote app. Frames that
    /// arrive while listening is off are dropped.
    pub fn publish_frame(&self, frame: Bytes) {
        if self.is_active() {
            self.publisher.publish(topics::AUDIO_RESPONSE, frame);
        }
    }
}

/// Step the Bluetooth sink volume up or down and clamp to 0-100%.
pub async fn change_volume(direction: VolumeDirection, step: u8) -> Result<()> {
    let sink = find_bluetooth_sink()
        .await?
        .ok_or_else(|| Error::Audio("no Bluetooth sink found".to_string()))?;

    let current = current_volume_percent(&sink)
        .await?
        .ok_or_else(|| Error::Audio(format!("could not read volume of sink {sink}")))?;

    let target = step_volume(current, direction, step);

    let status = Command::new("pactl")
        .arg("set-sink-volume")
        .arg(&sink)
        .arg(format!("{target}%"))
        .status()
        .await?;
    if !status.success() {
        return Err(Error::Audio(format!("pactl exited with {status}")));
    }

    info!(sink, volume = target, "Volume adjusted");
    Ok(())
}

async fn find_bluetooth_sink() -> Result<Option<String>> {
    let output = Command::new("pactl")
        .arg("list")
        .arg("short")
        .arg("sinks")
        .output()
        .await?;
    Ok(parse_bluetooth_sink(&String::from_utf8_lossy(&output.stdout)))
}

async fn current_volume_percent(sink: &str) -> Result<Option<i32>> {
    let output = Command::new("pactl").arg("list").arg("sinks").output().await?;
    Ok(parse_volume_percent(
        &String::from_utf8_lossy(&output.stdout),
        sink,
    ))
}

/// New volume after one step, clamped to 0-100%.
fn step_volume(current: i32, direction: VolumeDirection, step: u8) -> i32 {
    let step = i32::from(step);
    match direction {
        VolumeDirection::Up => current + step,
        VolumeDirection::Down => current - step,
    }
    .clamp(0, 100)
}

/// Pick the first `bluez_output` sink from `pactl list short sinks` output.
fn parse_bluetooth_sink(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains("bluez_output"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .next()
}

/// Extract the volume percentage for `sink` from `pactl list sinks` output.
fn parse_volume_percent(output: &str, sink: &str) -> Option<i32> {
    let percent = Regex::new(r"(\d+)%").ok()?;
    let mut inside_sink = false;

    for line in output.lines() {
        if line.contains(sink) {
            inside_sink = true;
        } else if inside_sink && line.contains("Volume:") && !line.contains("Channel") {
            if let Some(captures) = percent.captures(line) {
                return captures.get(1)?.as_str().parse().ok();
            }
        } else if inside_sink && line.trim().is_empty() {
            // End of this sink's block
            break;
        }
    }
    None
}
