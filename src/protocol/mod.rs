pub mod command;
pub mod config;
pub mod gps;
pub mod nmea;
