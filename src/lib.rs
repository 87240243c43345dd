//! gpslink: relays simulator GPS telemetry to navigation apps
//!
//! The crate is built around a connection lifecycle controller
//! ([`core::ConnectionController`]) that drives start/stop/poll cycles against
//! a broadcaster backend through the [`api::CommandGateway`] trait. The backend
//! either lives in-process ([`api::LocalGateway`]) or behind the HTTP command
//! surface ([`api::HttpGateway`]), and pushes samples over UDP (X-Plane XGPS)
//! or a serial port (NMEA 0183).

pub mod api;
pub mod backend;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;
pub mod utils;

pub use api::*;
