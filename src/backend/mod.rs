//! Telemetry broadcaster backend
//!
//! Owns at most one broadcast session. A session is a dedicated thread that
//! pulls a sample from the [`TelemetrySource`] at the configured cadence and
//! hands it to the transport's [`Broadcaster`]. The connection controller
//! reaches this through a command gateway and never touches it directly.

pub mod broadcaster;
pub mod serial;
pub mod telemetry;
pub mod udp;

use anyhow::{Context, Result};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crate::{protocol::config::StartOptions, utils::ports::enumerate_ports};
use broadcaster::{open_broadcaster, Broadcaster};
use telemetry::TelemetrySource;

pub use telemetry::FixedPosition;

pub struct Backend {
    source: Arc<dyn TelemetrySource>,
    session: Option<Session>,
}

impl Backend {
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self {
            source,
            session: None,
        }
    }

    /// Start broadcasting. Repeating a start with the options of a running
    /// session keeps that session; different options replace it.
    pub fn start(&mut self, options: StartOptions) -> Result<()> {
        options.config.validate()?;

        if let Some(session) = &self.session {
            if session.options == options && session.is_alive() {
                log::debug!("Broadcast already running on {}", options.config);
                return Ok(());
            }
        }

        self.stop();
        let broadcaster = open_broadcaster(&options.config)?;
        self.launch(options, broadcaster)
    }

    fn launch(&mut self, options: StartOptions, broadcaster: Box<dyn Broadcaster>) -> Result<()> {
        let session = Session::spawn(options, broadcaster, self.source.clone())?;
        log::info!(
            "Broadcasting on {} every {:?}",
            session.options.config,
            session.options.refresh_rate.cadence()
        );
        self.session = Some(session);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("Stopping broadcast on {}", session.options.config);
            session.shutdown();
        }
    }

    /// Healthy means a session is running and the source has data to send.
    pub fn status(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_alive) && self.source.is_connected()
    }

    /// Options of the current session, if any.
    pub fn active_options(&self) -> Option<&StartOptions> {
        self.session.as_ref().map(|session| &session.options)
    }

    pub fn list_available_com_ports(&self) -> Result<Vec<String>> {
        enumerate_ports()
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Session {
    options: StartOptions,
    alive: Arc<AtomicBool>,
    stop_tx: flume::Sender<()>,
    thread: JoinHandle<()>,
}

impl Session {
    fn spawn(
        options: StartOptions,
        broadcaster: Box<dyn Broadcaster>,
        source: Arc<dyn TelemetrySource>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = flume::bounded(1);
        let alive = Arc::new(AtomicBool::new(true));
        let cadence = options.refresh_rate.cadence();

        let thread = std::thread::Builder::new()
            .name("gpslink-broadcast".to_string())
            .spawn({
                let alive = alive.clone();
                move || broadcast_loop(broadcaster, source, cadence, stop_rx, alive)
            })
            .context("Failed to spawn broadcast thread")?;

        Ok(Self {
            options,
            alive,
            stop_tx,
            thread,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            log::warn!("Broadcast thread panicked");
        }
    }
}

fn broadcast_loop(
    mut broadcaster: Box<dyn Broadcaster>,
    source: Arc<dyn TelemetrySource>,
    cadence: Duration,
    stop_rx: flume::Receiver<()>,
    alive: Arc<AtomicBool>,
) {
    loop {
        if let Some(data) = source.next_sample() {
            if let Err(err) = broadcaster.send(&data) {
                log::warn!("Broadcast failed, ending session: {err:#}");
                break;
            }
        }

        match stop_rx.recv_timeout(cadence) {
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    alive.store(false, Ordering::SeqCst);
    log::debug!("Broadcast loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        config::{RefreshRate, SerialConfig, TransportConfig, UdpConfig},
        gps::GpsData,
    };
    use anyhow::anyhow;
    use std::net::{Ipv4Addr, UdpSocket};

    struct Parked {
        connected: AtomicBool,
    }

    impl TelemetrySource for Parked {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn next_sample(&self) -> Option<GpsData> {
            Some(GpsData::stationary(1.0, 2.0, 3.0))
        }
    }

    struct Broken;

    impl Broadcaster for Broken {
        fn send(&mut self, _data: &GpsData) -> Result<()> {
            Err(anyhow!("device unplugged"))
        }
    }

    fn receiver() -> Result<(UdpSocket, StartOptions)> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        socket.set_read_timeout(Some(Duration::from_secs(2)))?;
        let options = StartOptions {
            refresh_rate: RefreshRate::Fast,
            config: TransportConfig::Udp(UdpConfig {
                port: socket.local_addr()?.port(),
                address: Ipv4Addr::LOCALHOST,
            }),
        };
        Ok((socket, options))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_start_status_stop() -> Result<()> {
        let (socket, options) = receiver()?;
        let mut backend = Backend::new(Arc::new(FixedPosition::default()));
        assert!(!backend.status());

        backend.start(options.clone())?;
        assert!(backend.status());
        assert_eq!(backend.active_options(), Some(&options));

        let mut buf = [0u8; 256];
        let (len, _) = socket.recv_from(&mut buf)?;
        assert!(std::str::from_utf8(&buf[..len])?.starts_with("XGPSMSFS,"));

        backend.stop();
        assert!(!backend.status());
        assert_eq!(backend.active_options(), None);
        Ok(())
    }

    #[test]
    fn test_repeated_start_keeps_session() -> Result<()> {
        let (_socket, options) = receiver()?;
        let mut backend = Backend::new(Arc::new(FixedPosition::default()));

        backend.start(options.clone())?;
        let first_alive = backend.session.as_ref().map(|s| s.alive.clone());
        backend.start(options)?;
        let second_alive = backend.session.as_ref().map(|s| s.alive.clone());

        match (first_alive, second_alive) {
            (Some(a), Some(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("session missing"),
        }
        Ok(())
    }

    #[test]
    fn test_changed_options_restart_session() -> Result<()> {
        let (_socket, options) = receiver()?;
        let mut backend = Backend::new(Arc::new(FixedPosition::default()));

        backend.start(options.clone())?;
        let slow = StartOptions {
            refresh_rate: RefreshRate::Slow,
            ..options
        };
        backend.start(slow.clone())?;

        assert!(backend.status());
        assert_eq!(backend.active_options(), Some(&slow));
        Ok(())
    }

    #[test]
    fn test_invalid_options_rejected() {
        let mut backend = Backend::new(Arc::new(FixedPosition::default()));
        let result = backend.start(StartOptions {
            refresh_rate: RefreshRate::Fast,
            config: TransportConfig::Serial(SerialConfig {
                port: String::new(),
                baud_rate: 4800,
            }),
        });
        assert!(result.is_err());
        assert!(!backend.status());
    }

    #[test]
    fn test_status_follows_source() -> Result<()> {
        let (_socket, options) = receiver()?;
        let source = Arc::new(Parked {
            connected: AtomicBool::new(false),
        });
        let mut backend = Backend::new(source.clone());

        backend.start(options)?;
        assert!(!backend.status());

        source.connected.store(true, Ordering::SeqCst);
        assert!(backend.status());
        Ok(())
    }

    #[test]
    fn test_failed_broadcast_ends_session() -> Result<()> {
        let (_socket, options) = receiver()?;
        let mut backend = Backend::new(Arc::new(FixedPosition::default()));

        backend.launch(options, Box::new(Broken))?;
        assert!(wait_until(|| !backend.status()));
        Ok(())
    }
}
