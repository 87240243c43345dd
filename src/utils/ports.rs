use anyhow::{Context, Result};
use serialport::SerialPortInfo;

/// Names of the serial ports visible to this machine, sorted and deduplicated.
pub fn enumerate_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(port_names(ports))
}

pub(crate) fn port_names(ports: Vec<SerialPortInfo>) -> Vec<String> {
    let mut names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    names.sort();
    names.dedup();
    names
}
