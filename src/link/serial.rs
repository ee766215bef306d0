//! Serial-port transport (USB CDC or UART adapter).

use std::io::{Read, Write};
use std::time::Duration;

use log::info;
use serialport::{ClearBuffer, SerialPort};

use super::transport::Transport;

/// Read timeout; reads are only issued for bytes already pending.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud` and discard anything buffered from before.
    pub fn open(path: &str, baud: u32) -> serialport::Result<Self> {
        let port = serialport::new(path, baud).timeout(READ_TIMEOUT).open()?;
        port.clear(ClearBuffer::All)?;
        info!("LINK: opened {} @ {} baud", path, baud);
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    type Error = std::io::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.port.write(data)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.port.flush()
    }

    fn available(&mut self) -> Result<usize, Self::Error> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(std::io::Error::from)
    }
}
