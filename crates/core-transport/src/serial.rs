//! Serial transport: 8N1 at a driver-chosen speed, optional hardware flow
//! control, and baud switching for probe cycles.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{SUBSEQUENT_TIMEOUT, Transport, TransportError, TransportResult};

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    baud: u32,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32, hardware_flow: bool) -> TransportResult<Self> {
        let flow = if hardware_flow {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(flow)
            .timeout(SUBSEQUENT_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Open(path.into(), e.to_string()))?;
        tracing::debug!(target: "transport.serial", path, baud, "opened");
        Ok(Self {
            port,
            path: path.into(),
            baud,
        })
    }

    fn map_io(&self, error: std::io::Error) -> TransportError {
        match error.kind() {
            ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                TransportError::Busy(error.to_string())
            }
            _ => TransportError::Disconnected(format!("{}: {error}", self.path)),
        }
    }
}

impl Transport for SerialTransport {
    fn await_input(&mut self, timeout: Duration) -> TransportResult<bool> {
        // The serial crate exposes no readiness select; poll the driver's
        // input count instead.
        let deadline = Instant::now() + timeout;
        loop {
            let pending = self
                .port
                .bytes_to_read()
                .map_err(|e| TransportError::Disconnected(e.to_string()))?;
            if pending > 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn read(&mut self, buffer: &mut [u8], block_first: bool) -> TransportResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let mut offset = 0;
        while offset < buffer.len() {
            let first = offset == 0;
            if first && !block_first {
                let pending = self
                    .port
                    .bytes_to_read()
                    .map_err(|e| TransportError::Disconnected(e.to_string()))?;
                if pending == 0 {
                    return Ok(0);
                }
            }
            match self.port.read(&mut buffer[offset..offset + 1]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.map_io(e)),
            }
        }
        Ok(offset)
    }

    fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        self.port.write_all(bytes).map_err(|e| self.map_io(e))?;
        self.port.flush().map_err(|e| self.map_io(e))?;
        Ok(bytes.len())
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Disconnected(e.to_string()))
    }

    fn set_baud(&mut self, baud: u32) -> TransportResult<bool> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| TransportError::Busy(e.to_string()))?;
        self.baud = baud;
        tracing::debug!(target: "transport.serial", path = %self.path, baud, "speed changed");
        Ok(true)
    }

    fn transfer_millis(&self, count: usize) -> u64 {
        // 8N1: ten bit times per byte.
        if self.baud == 0 {
            return 1;
        }
        ((count as u64 * 10 * 1000) / self.baud as u64) + 1
    }
}
