//! Message-bus boundary.
//!
//! Inbound MQTT messages are decoded exactly once, at this boundary, into the
//! closed [`BusCommand`] set; everything past the decoder matches exhaustively
//! on tagged variants instead of topic strings. Outbound publishes go through
//! the [`BusPublisher`] seam so the control plane never depends on the MQTT
//! client directly.

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::error::Result;

pub use rumqttc::EventLoop as BusEventLoop;

/// Bus topic names shared with the remote control application.
pub mod topics {
    /// Remote app requests camera on/off
    pub const REMOTE_CAMERA_CONTROL: &str = "ring/remote_app_control/camera";
    /// Remote app requests microphone playback on/off
    pub const REMOTE_MICROPHONE_CONTROL: &str = "ring/remote_app_control/microphone";
    /// Remote app pushes an audio blob to play at the door
    pub const REMOTE_AUDIO_DATA: &str = "ring/remote_app_audio_data";
    /// Remote app requests a scene description
    pub const VISION_REQUEST: &str = "ring/gptrequest";
    /// Remote app requests a volume step
    pub const VOLUME_CONTROL: &str = "ring/remote_app_control/volume";

    /// Local camera state acknowledgements (published)
    pub const LOCAL_CAMERA_STATE: &str = "ring/local_dev_control/camera";
    /// Vision query responses (published)
    pub const VISION_RESPONSE: &str = "ring/gptresponse";
    /// Audio pipeline responses (published)
    pub const AUDIO_RESPONSE: &str = "ring/audioresponse";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDirection {
    Up,
    Down,
}

/// Closed set of inbound control commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCommand {
    CameraPower(PowerState),
    Microphone(PowerState),
    AudioData(Bytes),
    VisionQuery,
    Volume(VolumeDirection),
}

/// Decode one inbound (topic, payload) pair. Unknown topics and malformed
/// payloads yield `None`; the caller logs and drops them.
#[must_use]
pub fn decode(topic: &str, payload: &[u8]) -> Option<BusCommand> {
    match topic {
        topics::REMOTE_CAMERA_CONTROL => {
            parse_power(payload).map(BusCommand::CameraPower)
        }
        topics::REMOTE_MICROPHONE_CONTROL => {
            parse_power(payload).map(BusCommand::Microphone)
        }
        topics::REMOTE_AUDIO_DATA => Some(BusCommand::AudioData(Bytes::copy_from_slice(payload))),
        topics::VISION_REQUEST => Some(BusCommand::VisionQuery),
        topics::VOLUME_CONTROL => match payload {
            b"up" => Some(BusCommand::Volume(VolumeDirection::Up)),
            b"down" => Some(BusCommand::Volume(VolumeDirection::Down)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_power(payload: &[u8]) -> Option<PowerState> {
    match std::str::from_utf8(payload).ok()?.trim().to_lowercase().as_str() {
        "on" => Some(PowerState::On),
        "off" => Some(PowerState::Off),
        _ => None,
    }
}

/// Outbound publish seam. Implementations are fire-and-forget: failures are
/// logged, never propagated into the control plane.
pub trait BusPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Bytes);
}

/// MQTT-backed bus client.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Connect to the broker. The returned [`EventLoop`] must be driven by
    /// [`run_event_loop`] for anything to make progress.
    #[must_use]
    pub fn connect(config: &BusConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.host.clone(),
            config.port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));

        let (client, event_loop) = AsyncClient::new(options, 64);
        (Self { client }, event_loop)
    }

    /// Topics the hub listens on.
    #[must_use]
    pub fn subscriptions() -> [&'static str; 5] {
        [
            topics::REMOTE_CAMERA_CONTROL,
            topics::REMOTE_MICROPHONE_CONTROL,
            topics::REMOTE_AUDIO_DATA,
            topics::VISION_REQUEST,
            topics::VOLUME_CONTROL,
        ]
    }

    async fn subscribe_all(&self) -> Result<()> {
        for topic in Self::subscriptions() {
            self.client.subscribe(topic, QoS::AtMostOnce).await?;
        }
        info!("Subscribed to all control topics");
        Ok(())
    }

    /// Send the MQTT disconnect packet (process shutdown).
    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        info!("Bus disconnected");
        Ok(())
    }
}

impl BusPublisher for MqttBus {
    fn publish(&self, topic: &str, payload: Bytes) {
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
        {
            warn!(topic, "Bus publish failed: {e}");
        }
    }
}

/// Drive the MQTT event loop: resubscribe on every (re)connect, hand decoded
/// commands to `on_command`, and run `on_disconnect` as the safety action when
/// the broker connection drops. Reconnection is retried forever.
pub async fn run_event_loop<C, D, CFut, DFut>(
    bus: MqttBus,
    mut event_loop: EventLoop,
    on_command: C,
    on_disconnect: D,
) where
    C: Fn(BusCommand) -> CFut,
    CFut: std::future::Future<Output = ()>,
    D: Fn() -> DFut,
    DFut: std::future::Future<Output = ()>,
{
    let bus = Arc::new(bus);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Bus connected");
                if let Err(e) = bus.subscribe_all().await {
                    warn!("Bus subscription failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match decode(&publish.topic, &publish.payload) {
                    Some(command) => {
                        debug!(topic = %publish.topic, "Bus command received");
                        on_command(command).await;
                    }
                    None => {
                        warn!(topic = %publish.topic, "Unrecognized bus message dropped");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Bus connection lost: {e}");
                on_disconnect().await;
                // Back off before the next reconnect attempt
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
