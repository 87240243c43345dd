use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr, time::Duration};

pub const DEFAULT_UDP_PORT: u16 = 49002;
pub const DEFAULT_UDP_ADDRESS: Ipv4Addr = Ipv4Addr::BROADCAST;
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// How often the backend pushes a telemetry sample to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshRate {
    /// Roughly ten samples per second.
    #[default]
    Fast,
    /// One sample per second.
    Slow,
}

impl RefreshRate {
    /// Broadcast cadence the backend uses for this rate.
    pub fn cadence(self) -> Duration {
        match self {
            RefreshRate::Fast => Duration::from_millis(100),
            RefreshRate::Slow => Duration::from_millis(1000),
        }
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshRate::Fast => write!(f, "fast"),
            RefreshRate::Slow => write!(f, "slow"),
        }
    }
}

impl std::str::FromStr for RefreshRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(RefreshRate::Fast),
            "slow" => Ok(RefreshRate::Slow),
            other => Err(ConfigError::UnknownRefreshRate {
                value: other.to_string(),
            }),
        }
    }
}

/// UDP broadcast target. `address` is either a broadcast mask such as
/// 255.255.255.255 or the exact address of the navigation device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpConfig {
    pub port: u16,
    #[serde(rename = "netmask")]
    pub address: Ipv4Addr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_UDP_PORT,
            address: DEFAULT_UDP_ADDRESS,
        }
    }
}

/// RS-232 target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

/// Transport used to deliver telemetry. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    #[serde(rename = "udp")]
    Udp(UdpConfig),
    #[serde(rename = "com")]
    Serial(SerialConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Udp(UdpConfig::default())
    }
}

impl TransportConfig {
    pub fn is_serial(&self) -> bool {
        matches!(self, TransportConfig::Serial(_))
    }

    /// Check the values before they are handed to the gateway.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TransportConfig::Udp(udp) => {
                if udp.port == 0 {
                    return Err(ConfigError::InvalidUdpPort);
                }
                if udp.address.is_unspecified() {
                    return Err(ConfigError::InvalidUdpAddress {
                        address: udp.address,
                    });
                }
                Ok(())
            }
            TransportConfig::Serial(serial) => {
                if serial.port.trim().is_empty() {
                    return Err(ConfigError::MissingSerialPort);
                }
                if serial.baud_rate == 0 {
                    return Err(ConfigError::InvalidBaudRate);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Udp(udp) => write!(f, "udp://{}:{}", udp.address, udp.port),
            TransportConfig::Serial(serial) => {
                write!(f, "serial://{}@{}", serial.port, serial.baud_rate)
            }
        }
    }
}

/// Options carried by a start command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub refresh_rate: RefreshRate,
    pub config: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ConfigError {
    #[display("UDP port must be between 1 and 65535")]
    InvalidUdpPort,
    #[display("UDP address {address} cannot be used as a broadcast target")]
    InvalidUdpAddress {
        #[error(not(source))]
        address: Ipv4Addr,
    },
    #[display("no serial port selected")]
    MissingSerialPort,
    #[display("baud rate must be greater than zero")]
    InvalidBaudRate,
    #[display("unknown refresh rate '{value}', expected 'fast' or 'slow'")]
    UnknownRefreshRate {
        #[error(not(source))]
        value: String,
    },
}
