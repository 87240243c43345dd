pub mod actions;

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::{Ipv4Addr, SocketAddr};

use crate::{backend::FixedPosition, protocol::config::RefreshRate};

pub fn build_command() -> Command {
    Command::new("gpslink")
        .about("Relay simulator GPS telemetry to navigation apps over UDP or a serial port")
        .arg(
            Arg::new("udp-port")
                .long("udp-port")
                .help("UDP destination port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("udp-address")
                .long("udp-address")
                .help("UDP destination address, broadcast by default")
                .value_name("ADDR")
                .value_parser(clap::value_parser!(Ipv4Addr)),
        )
        .arg(
            Arg::new("serial-port")
                .long("serial-port")
                .help("Send NMEA sentences to this serial port instead of UDP")
                .value_name("PORT")
                .conflicts_with_all(["udp-port", "udp-address"]),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .help("Serial baud rate")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("refresh-rate")
                .long("refresh-rate")
                .help("Broadcast cadence: fast or slow")
                .value_name("RATE")
                .value_parser(clap::value_parser!(RefreshRate)),
        )
        .arg(
            Arg::new("position")
                .long("position")
                .help("Fixed aircraft position broadcast by the local backend")
                .value_name("LAT,LON[,ALT]")
                .allow_hyphen_values(true)
                .value_parser(clap::value_parser!(FixedPosition)),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Serve the backend command surface over HTTP on this address")
                .value_name("ADDR")
                .value_parser(clap::value_parser!(SocketAddr))
                .conflicts_with_all(["remote", "list-ports"]),
        )
        .arg(
            Arg::new("remote")
                .long("remote")
                .help("Control a backend served by another gpslink instance")
                .value_name("URL")
                .conflicts_with("position"),
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print port lists and state updates as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-config-cache")
                .long("no-config-cache")
                .help("Neither load nor save the last used settings")
                .action(ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}
