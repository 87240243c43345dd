use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use super::broadcaster::Broadcaster;
use crate::protocol::{config::UdpConfig, gps::GpsData, nmea::xgps_sentence};

/// Sends one XGPS datagram per sample to the configured address.
#[derive(Debug)]
pub struct UdpBroadcaster {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl UdpBroadcaster {
    pub fn open(config: &UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .context("Failed to bind UDP broadcast socket")?;
        socket
            .set_broadcast(true)
            .context("Failed to enable SO_BROADCAST")?;

        let target = SocketAddrV4::new(config.address, config.port);
        log::info!("UDP broadcaster sending to {target}");
        Ok(Self { socket, target })
    }
}

impl Broadcaster for UdpBroadcaster {
    fn send(&mut self, data: &GpsData) -> Result<()> {
        let sentence = xgps_sentence(data);
        self.socket
            .send_to(sentence.as_bytes(), self.target)
            .with_context(|| format!("Failed to send XGPS datagram to {}", self.target))?;
        Ok(())
    }
}
