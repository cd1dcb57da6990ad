//! Deterministic in-memory transport for driver and codec tests.
//!
//! Input arrives from a queue that tests prime directly; an optional
//! responder closure watches writes and queues replies, which is how probe
//! handshakes (identity request → identity response) are scripted.

use std::collections::VecDeque;
use std::time::Duration;

use crate::{Transport, TransportError, TransportResult};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
pub struct MockTransport {
    input: VecDeque<u8>,
    /// Everything written, flattened.
    pub written: Vec<u8>,
    /// Each write call as its own frame.
    pub writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    /// When set, every operation reports a dead endpoint.
    pub disconnected: bool,
    /// When set, writes report busy instead of succeeding.
    pub busy_writes: bool,
    pub bauds_seen: Vec<u32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes the device "sends" unprompted.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Install a device model: called with each written frame, returns
    /// bytes to queue as the reply.
    pub fn respond_with<F>(&mut self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
    }

    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    /// Total bytes written since the last call.
    pub fn take_written(&mut self) -> Vec<u8> {
        self.writes.clear();
        std::mem::take(&mut self.written)
    }

    fn check_alive(&self) -> TransportResult<()> {
        if self.disconnected {
            Err(TransportError::Disconnected("mock endpoint gone".into()))
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn await_input(&mut self, _timeout: Duration) -> TransportResult<bool> {
        self.check_alive()?;
        Ok(!self.input.is_empty())
    }

    fn read(&mut self, buffer: &mut [u8], _block_first: bool) -> TransportResult<usize> {
        self.check_alive()?;
        let mut count = 0;
        while count < buffer.len() {
            match self.input.pop_front() {
                Some(byte) => {
                    buffer[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        self.check_alive()?;
        if self.busy_writes {
            return Err(TransportError::Busy("mock busy".into()));
        }
        self.written.extend_from_slice(bytes);
        self.writes.push(bytes.to_vec());
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(bytes);
            self.input.extend(reply);
        }
        Ok(bytes.len())
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        self.check_alive()?;
        self.input.clear();
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> TransportResult<bool> {
        self.check_alive()?;
        self.bauds_seen.push(baud);
        Ok(true)
    }
}

/// A cloneable handle onto one [`MockTransport`], so a test can keep
/// scripting the device after handing the transport to a driver that owns
/// it as a boxed trait object.
#[derive(Clone, Default)]
pub struct SharedMockTransport(pub std::rc::Rc<std::cell::RefCell<MockTransport>>);

impl SharedMockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.0.borrow_mut().push_input(bytes);
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.0.borrow_mut().respond_with(responder);
    }

    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        let mut mock = self.0.borrow_mut();
        let frames = mock.writes.clone();
        mock.take_written();
        frames
    }

    pub fn set_disconnected(&self, dead: bool) {
        self.0.borrow_mut().disconnected = dead;
    }

    pub fn bauds_seen(&self) -> Vec<u32> {
        self.0.borrow().bauds_seen.clone()
    }
}

impl Transport for SharedMockTransport {
    fn await_input(&mut self, timeout: Duration) -> TransportResult<bool> {
        self.0.borrow_mut().await_input(timeout)
    }

    fn read(&mut self, buffer: &mut [u8], block_first: bool) -> TransportResult<usize> {
        self.0.borrow_mut().read(buffer, block_first)
    }

    fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        self.0.borrow_mut().write(bytes)
    }

    fn discard_input(&mut self) -> TransportResult<()> {
        self.0.borrow_mut().discard_input()
    }

    fn set_baud(&mut self, baud: u32) -> TransportResult<bool> {
        self.0.borrow_mut().set_baud(baud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_scripts_a_handshake() {
        let mut mock = MockTransport::new();
        mock.respond_with(|frame| {
            if frame == [0x1B, 0x84] {
                vec![0xAA, 0xBB]
            } else {
                Vec::new()
            }
        });
        mock.write(&[0x1B, 0x84]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf, true).unwrap(), 2);
        assert_eq!(&buf[..2], &[0xAA, 0xBB]);
    }

    #[test]
    fn disconnect_poisons_everything() {
        let mut mock = MockTransport::new();
        mock.disconnected = true;
        assert!(matches!(
            mock.write(&[1]),
            Err(TransportError::Disconnected(_))
        ));
        let mut buf = [0u8; 1];
        assert!(mock.read(&mut buf, false).is_err());
    }
}
