use anyhow::Result;

use super::{serial::SerialBroadcaster, udp::UdpBroadcaster};
use crate::protocol::{config::TransportConfig, gps::GpsData};

/// Pushes one telemetry sample to a transport.
///
/// An `Err` ends the broadcast session; transient conditions the transport can
/// ride out must be swallowed by the implementation.
pub trait Broadcaster: Send {
    fn send(&mut self, data: &GpsData) -> Result<()>;
}

/// Open the transport described by `config`.
pub fn open_broadcaster(config: &TransportConfig) -> Result<Box<dyn Broadcaster>> {
    let broadcaster: Box<dyn Broadcaster> = match config {
        TransportConfig::Udp(udp) => Box::new(UdpBroadcaster::open(udp)?),
        TransportConfig::Serial(serial) => Box::new(SerialBroadcaster::open(serial)?),
    };
    Ok(broadcaster)
}
