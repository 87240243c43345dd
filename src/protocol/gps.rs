use serde::{Deserialize, Serialize};

const METERS_PER_SECOND_TO_KNOTS: f64 = 1.943_844;

/// One telemetry sample as produced by a simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsData {
    /// Latitude in degrees, north positive.
    pub lat: f64,
    /// Longitude in degrees, east positive.
    pub lon: f64,
    /// Altitude above mean sea level in meters.
    pub alt: f64,
    /// Pressure altitude in meters.
    pub pressure_altitude: f64,
    /// Ground track relative to true north, degrees.
    pub ground_true_track: f64,
    /// Ground track relative to magnetic north, degrees.
    pub ground_magnetic_track: f64,
    /// Magnetic variation in degrees, east positive.
    pub magnetic_variation: f64,
    /// Ground speed in meters per second.
    pub ground_speed: f64,
}

impl GpsData {
    /// A stationary sample at the given position.
    pub fn stationary(lat: f64, lon: f64, alt: f64) -> Self {
        Self {
            lat,
            lon,
            alt,
            pressure_altitude: alt,
            ground_true_track: 0.0,
            ground_magnetic_track: 0.0,
            magnetic_variation: 0.0,
            ground_speed: 0.0,
        }
    }

    pub fn lat_as_degrees_minutes_dir(&self) -> (u32, f64, char) {
        let (degrees, minutes) = split_degrees_minutes(self.lat);
        (degrees, minutes, if self.lat < 0.0 { 'S' } else { 'N' })
    }

    pub fn lon_as_degrees_minutes_dir(&self) -> (u32, f64, char) {
        let (degrees, minutes) = split_degrees_minutes(self.lon);
        (degrees, minutes, if self.lon < 0.0 { 'W' } else { 'E' })
    }

    pub fn magnetic_variation_as_abs_dir(&self) -> (f64, char) {
        let dir = if self.magnetic_variation < 0.0 {
            'W'
        } else {
            'E'
        };
        (self.magnetic_variation.abs(), dir)
    }

    pub fn ground_speed_in_knots(&self) -> f64 {
        self.ground_speed * METERS_PER_SECOND_TO_KNOTS
    }
}

fn split_degrees_minutes(value: f64) -> (u32, f64) {
    let value = value.abs();
    let degrees = value.trunc();
    (degrees as u32, (value - degrees) * 60.0)
}
