use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

use crate::protocol::gps::GpsData;

/// Where the broadcaster gets its samples from.
///
/// A simulator bridge reports `false` from `is_connected` while the simulator
/// is not running; the backend then reports an unhealthy status.
pub trait TelemetrySource: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Latest sample, or `None` when nothing is available yet.
    fn next_sample(&self) -> Option<GpsData>;
}

/// A parked aircraft at a fixed position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedPosition {
    data: GpsData,
}

impl FixedPosition {
    pub fn new(data: GpsData) -> Self {
        Self { data }
    }
}

impl Default for FixedPosition {
    fn default() -> Self {
        Self::new(GpsData::stationary(0.0, 0.0, 0.0))
    }
}

impl TelemetrySource for FixedPosition {
    fn is_connected(&self) -> bool {
        true
    }

    fn next_sample(&self) -> Option<GpsData> {
        Some(self.data)
    }
}

/// Parses `LAT,LON[,ALT_M]` in decimal degrees.
impl FromStr for FixedPosition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(anyhow!("expected LAT,LON[,ALT], got '{s}'"));
        }

        let lat: f64 = parts[0]
            .parse()
            .with_context(|| format!("invalid latitude '{}'", parts[0]))?;
        let lon: f64 = parts[1]
            .parse()
            .with_context(|| format!("invalid longitude '{}'", parts[1]))?;
        let alt: f64 = match parts.get(2) {
            Some(alt) => alt
                .parse()
                .with_context(|| format!("invalid altitude '{alt}'"))?,
            None => 0.0,
        };

        if !(-90.0..=90.0).contains(&lat) {
            return Err(anyhow!("latitude {lat} out of range"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(anyhow!("longitude {lon} out of range"));
        }

        Ok(Self::new(GpsData::stationary(lat, lon, alt)))
    }
}
