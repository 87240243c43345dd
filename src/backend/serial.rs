use anyhow::{anyhow, Result};
use chrono::Utc;
use std::{
    io::{self, Write},
    time::{Duration, Instant},
};

use super::broadcaster::Broadcaster;
use crate::protocol::{
    config::SerialConfig,
    gps::GpsData,
    nmea::{gga_sentence, gsa_sentence, rmc_sentence},
};

const WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const GSA_INTERVAL: Duration = Duration::from_secs(1);

/// Open a serial port for writing, enabling exclusive access on Unix systems.
pub fn open_serial_port(port: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>> {
    let builder = serialport::new(port, baud_rate).timeout(WRITE_TIMEOUT);

    #[cfg(unix)]
    {
        let mut handle = builder
            .open_native()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))?;
        handle
            .set_exclusive(true)
            .map_err(|err| anyhow!("Failed to acquire exclusive access to {port}: {err}"))?;
        Ok(Box::new(handle))
    }

    #[cfg(not(unix))]
    {
        builder
            .open()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))
    }
}

/// Writes GGA and RMC for every sample and GSA at most once per second.
pub struct SerialBroadcaster<W: Write + Send = Box<dyn serialport::SerialPort>> {
    writer: W,
    last_gsa: Option<Instant>,
}

impl SerialBroadcaster {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = open_serial_port(&config.port, config.baud_rate)?;
        log::info!("Serial broadcaster writing to {} at {} baud", config.port, config.baud_rate);
        Ok(Self::new(port))
    }
}

impl<W: Write + Send> SerialBroadcaster<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            last_gsa: None,
        }
    }

    fn gsa_due(&self) -> bool {
        self.last_gsa
            .map_or(true, |sent| sent.elapsed() >= GSA_INTERVAL)
    }
}

impl<W: Write + Send> Broadcaster for SerialBroadcaster<W> {
    fn send(&mut self, data: &GpsData) -> Result<()> {
        let now = Utc::now();
        let mut payload = gga_sentence(&now, data);
        payload.push_str(&rmc_sentence(&now, data));

        let with_gsa = self.gsa_due();
        if with_gsa {
            payload.push_str(&gsa_sentence());
        }

        match self
            .writer
            .write_all(payload.as_bytes())
            .and_then(|_| self.writer.flush())
        {
            Ok(()) => {
                if with_gsa {
                    self.last_gsa = Some(Instant::now());
                }
                Ok(())
            }
            // Nobody reading the other end of a virtual port.
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                log::debug!("Serial write timed out, sample dropped");
                Ok(())
            }
            Err(err) => Err(anyhow!("Failed to write NMEA sentences: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingWriter(io::ErrorKind);

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "simulated"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn written(broadcaster: &SerialBroadcaster<Vec<u8>>) -> String {
        String::from_utf8_lossy(&broadcaster.writer).into_owned()
    }

    #[test]
    fn test_gsa_is_throttled() -> Result<()> {
        let mut broadcaster = SerialBroadcaster::new(Vec::new());
        let data = GpsData::stationary(10.0, 20.0, 100.0);

        broadcaster.send(&data)?;
        let first = written(&broadcaster);
        assert!(first.starts_with("$GPGGA,"));
        assert!(first.contains("$GPRMC,"));
        assert_eq!(first.matches("$GPGSA,").count(), 1);

        broadcaster.send(&data)?;
        let both = written(&broadcaster);
        assert_eq!(both.matches("$GPGGA,").count(), 2);
        assert_eq!(both.matches("$GPRMC,").count(), 2);
        assert_eq!(both.matches("$GPGSA,").count(), 1);
        Ok(())
    }

    #[test]
    fn test_every_sentence_is_crlf_terminated() -> Result<()> {
        let mut broadcaster = SerialBroadcaster::new(Vec::new());
        broadcaster.send(&GpsData::stationary(-33.9, 151.2, 5.0))?;

        let out = written(&broadcaster);
        let sentences: Vec<&str> = out.split_inclusive("\r\n").collect();
        assert_eq!(sentences.len(), 3);
        assert!(sentences.iter().all(|s| s.starts_with('$') && s.ends_with("\r\n")));
        Ok(())
    }

    #[test]
    fn test_write_timeout_is_tolerated() {
        let mut broadcaster = SerialBroadcaster::new(FailingWriter(io::ErrorKind::TimedOut));
        assert!(broadcaster.send(&GpsData::stationary(0.0, 0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_broken_pipe_ends_session() {
        let mut broadcaster = SerialBroadcaster::new(FailingWriter(io::ErrorKind::BrokenPipe));
        assert!(broadcaster.send(&GpsData::stationary(0.0, 0.0, 0.0)).is_err());
    }
}
