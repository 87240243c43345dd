pub mod ports;

pub use ports::enumerate_ports;
