/// NMEA 0183 and X-Plane XGPS sentence builders
///
/// Serial GPS receivers expect GGA (fix), RMC (recommended minimum) and GSA
/// (satellites in use) sentences terminated with CRLF. Network navigation apps
/// listening for X-Plane accept a single comma separated `XGPS` datagram.
use chrono::{DateTime, Utc};

use super::gps::GpsData;

/// Name advertised in the XGPS sentence.
pub const XGPS_SIMULATOR_NAME: &str = "MSFS";

/// XOR of every byte between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Append `*XX\r\n` to a sentence starting with `$`.
pub fn finish_sentence(sentence: &str) -> String {
    let body = sentence.strip_prefix('$').unwrap_or(sentence);
    format!("{sentence}*{:02X}\r\n", checksum(body))
}

/// Satellites-in-use sentence with a fixed, healthy 3D fix.
pub fn gsa_sentence() -> String {
    finish_sentence("$GPGSA,A,3,01,02,03,04,05,06,07,08,09,10,11,12,1.0,1.0,1.0")
}

pub fn gga_sentence(date: &DateTime<Utc>, data: &GpsData) -> String {
    let (lat_deg, lat_min, lat_dir) = data.lat_as_degrees_minutes_dir();
    let (lon_deg, lon_min, lon_dir) = data.lon_as_degrees_minutes_dir();

    finish_sentence(&format!(
        "$GPGGA,{},{:0>2}{:0>7.4},{},{:0>3}{:0>7.4},{},1,12,1.0,{:.1},M,0.0,M,,",
        date.format("%H%M%S%.3f"),
        lat_deg,
        lat_min,
        lat_dir,
        lon_deg,
        lon_min,
        lon_dir,
        data.pressure_altitude
    ))
}

pub fn rmc_sentence(date: &DateTime<Utc>, data: &GpsData) -> String {
    let (lat_deg, lat_min, lat_dir) = data.lat_as_degrees_minutes_dir();
    let (lon_deg, lon_min, lon_dir) = data.lon_as_degrees_minutes_dir();
    let (variation, variation_dir) = data.magnetic_variation_as_abs_dir();

    finish_sentence(&format!(
        "$GPRMC,{},A,{:0>2}{:0>7.4},{},{:0>3}{:0>7.4},{},{:.2},{:.2},{},{:.1},{},S",
        date.format("%H%M%S%.3f"),
        lat_deg,
        lat_min,
        lat_dir,
        lon_deg,
        lon_min,
        lon_dir,
        data.ground_speed_in_knots(),
        data.ground_true_track,
        date.format("%d%m%y"),
        variation,
        variation_dir,
    ))
}

/// `XGPS<name>,lon,lat,alt_m,track_deg,speed_mps`
pub fn xgps_sentence(data: &GpsData) -> String {
    format!(
        "XGPS{},{:.6},{:.6},{:.1},{:.2},{:.2}",
        XGPS_SIMULATOR_NAME,
        data.lon,
        data.lat,
        data.alt,
        data.ground_magnetic_track,
        data.ground_speed
    )
}
