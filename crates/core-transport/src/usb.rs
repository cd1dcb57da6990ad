//! USB transport: a bulk endpoint pair on a device matched by
//! vendor/product, with reads reaped in 100 ms chunks into a small stash.

use std::time::{Duration, Instant};

use rusb::{Context, DeviceHandle, UsbContext};

use crate::{SUBSEQUENT_TIMEOUT, Transport, TransportError, TransportResult};

/// How a driver names its device on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbChannelDefinition {
    pub vendor: u16,
    pub product: u16,
    pub configuration: u8,
    pub interface: u8,
    pub alternative: u8,
    /// Endpoint number of the input (device-to-host) bulk endpoint.
    pub input_endpoint: u8,
    /// Endpoint number of the output (host-to-device) bulk endpoint.
    pub output_endpoint: u8,
}

pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    definition: UsbChannelDefinition,
    /// Bytes reaped from the input endpoint but not yet consumed.
    stash: Vec<u8>,
}

const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

impl UsbTransport {
    /// Find and claim the first matching device, optionally filtered by
    /// its serial-number string.
    pub fn open(
        definitions: &[UsbChannelDefinition],
        serial_number: Option<&str>,
    ) -> TransportResult<Self> {
        let context =
            Context::new().map_err(|e| TransportError::Open("usb".into(), e.to_string()))?;
        let devices = context
            .devices()
            .map_err(|e| TransportError::Open("usb".into(), e.to_string()))?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            let Some(definition) = definitions.iter().find(|d| {
                d.vendor == descriptor.vendor_id() && d.product == descriptor.product_id()
            }) else {
                continue;
            };

            let mut handle = match device.open() {
                Ok(h) => h,
                Err(e) => {
                    tracing::debug!(target: "transport.usb", error = %e, "cannot open candidate");
                    continue;
                }
            };

            if let Some(wanted) = serial_number {
                let langs = handle
                    .read_languages(WRITE_TIMEOUT)
                    .map_err(|e| TransportError::Open("usb".into(), e.to_string()))?;
                let actual = langs.first().and_then(|lang| {
                    handle
                        .read_serial_number_string(*lang, &descriptor, WRITE_TIMEOUT)
                        .ok()
                });
                if actual.as_deref() != Some(wanted) {
                    continue;
                }
            }

            let _ = handle.set_auto_detach_kernel_driver(true);
            handle
                .set_active_configuration(definition.configuration)
                .or_else(|e| match e {
                    rusb::Error::Busy => Ok(()),
                    other => Err(other),
                })
                .map_err(|e| TransportError::Open("usb".into(), e.to_string()))?;
            handle
                .claim_interface(definition.interface)
                .map_err(|e| TransportError::Open("usb".into(), e.to_string()))?;
            if definition.alternative != 0 {
                handle
                    .set_alternate_setting(definition.interface, definition.alternative)
                    .map_err(|e| TransportError::Open("usb".into(), e.to_string()))?;
            }

            tracing::debug!(
                target: "transport.usb",
                vendor = format_args!("{:04X}", definition.vendor),
                product = format_args!("{:04X}", definition.product),
                "claimed"
            );
            return Ok(Self {
                handle,
                definition: *definition,
                stash: Vec::with_capacity(64),
            });
        }

        Err(TransportError::Open(
            "usb".into(),
            "no matching device".into(),
        ))
    }

    fn reap(&mut self, timeout: Duration) -> TransportResult<usize> {
        let mut chunk = [0u8; 64];
        match self.handle.read_bulk(
            self.definition.input_endpoint | rusb::constants::LIBUSB_ENDPOINT_IN,
            &mut chunk,
            timeout,
        ) {
            Ok(n) => {
                self.stash.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(rusb::Error::Timeout) => Ok(0),
            Err(rusb::Error::Busy) => Err(TransportError::Busy("usb reap".into())),
            Err(e) => Err(TransportError::Disconnected(e.to_string())),
        }
    }
}

impl Transport for UsbTransport {
    fn await_input(&mut self, timeout: Duration) -> TransportResult<bool> {
        if !self.stash.is_empty() {
            return Ok(true);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let step = SUBSEQUENT_TIMEOUT.min(deadline.saturating_duration_since(Instant::now()));
            if self.reap(step.max(Duration::from_millis(1)))? > 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn read(&mut self, buffer: &mut [u8], block_first: bool) -> TransportResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        if self.stash.is_empty() {
            let timeout = if block_first {
                SUBSEQUENT_TIMEOUT
            } else {
                Duration::from_millis(1)
            };
            self.reap(timeout)?;
        }
        // Keep reaping while more is immediately available and the caller
        // still has room.
        while self.stash.len() < buffer.len() {
            if self.reap(Duration::from_millis(1))? == 0 {
                break;
            }
        }
        let count = self.stash.len().min(buffer.len());
        buffer[..count].copy_from_slice(&self.stash[..count]);
        self.stash.drain(..count);
        Ok(count)
    }

    fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        match self.handle.write_bulk(
            self.definition.output_endpoint | rusb::constants::LIBUSB_ENDPOINT_OUT,
            bytes,
            WRITE_TIMEOUT,
        ) {
            Ok(n) if n == bytes.len() => Ok(n),
            Ok(n) => Err(TransportError::Busy(format!(
                "truncated usb write: {n} < {}",
                bytes.len()
            ))),
            Err(rusb::Error::Busy) => Err(TransportError::Busy("usb write".into())),
            Err(e) => Err(TransportError::Disconnected(e.to_string())),
        }
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        self.stash.clear();
        while self.reap(Duration::from_millis(1))? > 0 {
            self.stash.clear();
        }
        Ok(())
    }
}
