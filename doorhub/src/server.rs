//! Server lifecycle management
//!
//! Manages the startup and shutdown of all hub components:
//! - frame-capture loop
//! - message-bus event loop
//! - hardware trigger router
//! - HTTP(S) streaming server

use std::sync::Arc;
use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use doorhub_core::bus::{run_event_loop, BusEventLoop, MqttBus};
use doorhub_core::camera::Camera;
use doorhub_core::capture::CaptureLoop;
use doorhub_core::control::CaptureStateMachine;
use doorhub_core::router::{EventRouter, Trigger};
use doorhub_core::{Config, FrameBuffer};

use crate::http::{create_router, AppState};

/// Bound on waiting for in-flight HTTP connections at shutdown.
const HTTP_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Container for shared services
pub struct Services {
    pub control: Arc<CaptureStateMachine>,
    pub router: Arc<EventRouter>,
    pub camera: Arc<dyn Camera>,
    pub buffer: FrameBuffer,
}

/// Doorhub server - manages all hub components
pub struct DoorhubServer {
    config: Config,
    services: Services,
    bus: MqttBus,
    bus_events: BusEventLoop,
    triggers: mpsc::Receiver<Trigger>,
}

impl DoorhubServer {
    pub fn new(
        config: Config,
        services: Services,
        bus: MqttBus,
        bus_events: BusEventLoop,
        triggers: mpsc::Receiver<Trigger>,
    ) -> Self {
        Self {
            config,
            services,
            bus,
            bus_events,
            triggers,
        }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Start all components and run until `shutdown` resolves or the HTTP
    /// server stops, then tear everything down in order: drain the HTTP
    /// server, disconnect the bus, stop the camera.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        info!("Starting doorhub server...");

        // Create shutdown signal channel
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Frame-capture loop: parks while capture is off, fills the shared
        // buffer while it is on
        let capture = CaptureLoop::new(
            self.services.camera.clone(),
            self.services.buffer.clone(),
            self.services.control.enabled_receiver(),
            self.config.frame_interval(),
        );
        tokio::spawn(capture.run());

        // Bus event loop: decoded commands go to the router; a broker
        // disconnect stops capture as the safety action
        let bus = self.bus.clone();
        let router = self.services.router.clone();
        let control = self.services.control.clone();
        tokio::spawn(run_event_loop(
            self.bus,
            self.bus_events,
            move |command| {
                let router = router.clone();
                async move { router.handle_command(command).await }
            },
            move || {
                let control = control.clone();
                async move {
                    warn!("Bus disconnected, stopping capture as safety action");
                    if let Err(e) = control.request_stop().await {
                        warn!("Safety stop failed: {e}");
                    }
                }
            },
        ));

        // Hardware trigger loop
        tokio::spawn(self.services.router.clone().run_triggers(self.triggers));

        // HTTP(S) streaming server
        let mut http_handle = start_http_server(&self.config, &self.services, shutdown_rx).await?;

        info!("All components started successfully");

        let mut http_stopped = false;
        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                http_stopped = true;
            }
            () = shutdown => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Signal all components to shut down
        let _ = shutdown_tx.send(true);

        // Wait for in-flight HTTP connections to drain, bounded
        if !http_stopped
            && tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut http_handle)
                .await
                .is_err()
        {
            warn!(
                "HTTP server did not stop within {}s, aborting",
                HTTP_DRAIN_TIMEOUT.as_secs()
            );
            http_handle.abort();
        }

        // Disconnect the message bus
        if let Err(e) = bus.disconnect().await {
            warn!("Bus disconnect failed: {e}");
        }

        // Cancel pending timers and power the camera off
        self.services.control.shutdown().await;

        info!("Doorhub server shut down complete");
        Ok(())
    }
}

/// Start the HTTP(S) server with graceful shutdown support.
///
/// In secure mode, missing or unreadable TLS material is a startup failure.
async fn start_http_server(
    config: &Config,
    services: &Services,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    let address = config.http_address();
    let addr: std::net::SocketAddr = address
        .parse()
        .with_context(|| format!("invalid server address '{address}'"))?;

    let app = create_router(AppState {
        buffer: services.buffer.clone(),
        asset_root: config.server.asset_root.clone().into(),
    });

    if config.server.secure {
        let tls = RustlsConfig::from_pem_file(
            &config.server.tls_cert_path,
            &config.server.tls_key_path,
        )
        .await
        .with_context(|| {
            format!(
                "failed to load TLS material from {} / {}",
                config.server.tls_cert_path, config.server.tls_key_path
            )
        })?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let mut rx = shutdown_rx;
        tokio::spawn(async move {
            let _ = rx.changed().await;
            shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
        });

        info!("HTTPS server listening on {addr}");
        Ok(tokio::spawn(async move {
            if let Err(e) = axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
            {
                error!("HTTPS server error: {e}");
            }
            info!("HTTPS server shut down gracefully");
        }))
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!("HTTP server listening on {addr}");
        Ok(tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {e}");
            }
            info!("HTTP server shut down gracefully");
        }))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use doorhub_core::audio::AudioPlayback;
    use doorhub_core::bus::BusPublisher;
    use doorhub_core::control::CaptureState;
    use doorhub_core::error::Result as CoreResult;
    use doorhub_core::router::FfplayAlert;
    use doorhub_core::OperatingMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingCamera {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Camera for CountingCamera {
        async fn configure(&self, _width: u32, _height: u32) -> CoreResult<()> {
            Ok(())
        }
        async fn start(&self) -> CoreResult<()> {
            Ok(())
        }
        async fn stop(&self) -> CoreResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn capture_frame(&self) -> CoreResult<Bytes> {
            Ok(Bytes::from_static(b"frame"))
        }
        async fn capture_snapshot(&self) -> CoreResult<Bytes> {
            Ok(Bytes::from_static(b"snap"))
        }
    }

    #[tokio::test]
    async fn test_teardown_stops_camera_and_completes() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.http_port = 0;

        let counting = Arc::new(CountingCamera::default());
        let camera: Arc<dyn Camera> = counting.clone();

        let (bus, bus_events) = MqttBus::connect(&config.bus);
        let publisher: Arc<dyn BusPublisher> = Arc::new(bus.clone());

        let control = Arc::new(CaptureStateMachine::new(
            camera.clone(),
            publisher.clone(),
            OperatingMode::Manual,
            Duration::from_secs(60),
        ));
        let router = Arc::new(EventRouter::new(
            control.clone(),
            publisher.clone(),
            camera.clone(),
            Arc::new(AudioPlayback::new(publisher)),
            None,
            Arc::new(FfplayAlert::new("/nonexistent/bell.mp3".into())),
            OperatingMode::Manual,
            Duration::from_secs(5),
            5,
        ));
        let (trigger_tx, trigger_rx) = mpsc::channel(4);

        control.request_start().await.expect("start capture");
        assert_eq!(control.state().await, CaptureState::On);

        let services = Services {
            control: control.clone(),
            router,
            camera,
            buffer: FrameBuffer::new(),
        };
        let server = DoorhubServer::new(config, services, bus, bus_events, trigger_rx);

        // Teardown must finish on its own once the shutdown future resolves
        server
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .expect("teardown");

        drop(trigger_tx);
        assert_eq!(control.state().await, CaptureState::Off);
        assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
    }
}
