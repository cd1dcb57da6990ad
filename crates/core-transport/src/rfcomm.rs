//! Bluetooth RFCOMM transport: a channel-numbered stream socket, switched
//! to non-blocking once connected so every read stays bounded.
//!
//! Linux only; other platforms get a stub that reports the medium as
//! unsupported, keeping endpoint parsing and driver code portable.

#[cfg(target_os = "linux")]
pub use linux::RfcommTransport;

#[cfg(not(target_os = "linux"))]
pub use fallback::RfcommTransport;

#[cfg(target_os = "linux")]
mod linux {
    use std::os::fd::RawFd;
    use std::time::Duration;

    use crate::{SUBSEQUENT_TIMEOUT, Transport, TransportError, TransportResult};

    const BTPROTO_RFCOMM: libc::c_int = 3;

    // Not exposed by the libc crate; layout per the kernel's rfcomm.h.
    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    pub struct RfcommTransport {
        fd: RawFd,
        address: [u8; 6],
    }

    impl RfcommTransport {
        /// Connect to `address` (wire byte order) on `channel`.
        pub fn open(address: [u8; 6], channel: u8) -> TransportResult<Self> {
            let fd = unsafe {
                libc::socket(libc::AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM)
            };
            if fd < 0 {
                return Err(TransportError::Open(
                    "bluetooth".into(),
                    std::io::Error::last_os_error().to_string(),
                ));
            }

            let addr = SockaddrRc {
                rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                rc_bdaddr: address,
                rc_channel: channel,
            };
            let rc = unsafe {
                libc::connect(
                    fd,
                    &addr as *const SockaddrRc as *const libc::sockaddr,
                    std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
                )
            };
            if rc != 0 {
                let error = std::io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(TransportError::Open("bluetooth".into(), error.to_string()));
            }

            // Bounded reads from here on.
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }

            tracing::debug!(target: "transport.rfcomm", channel, "connected");
            Ok(Self { fd, address })
        }

        fn poll_readable(&self, timeout: Duration) -> TransportResult<bool> {
            let mut fds = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut fds, 1, timeout.as_millis() as libc::c_int) };
            if rc < 0 {
                let error = std::io::Error::last_os_error();
                if error.kind() == std::io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                return Err(TransportError::Disconnected(error.to_string()));
            }
            if fds.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
                return Err(TransportError::Disconnected(format!(
                    "rfcomm {}: hangup",
                    self.describe()
                )));
            }
            Ok(rc > 0)
        }

        fn describe(&self) -> String {
            let a = self.address;
            format!(
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                a[5], a[4], a[3], a[2], a[1], a[0]
            )
        }
    }

    impl Drop for RfcommTransport {
        fn drop(&mut self) {
            unsafe { libc::close(self.fd) };
        }
    }

    impl Transport for RfcommTransport {
        fn await_input(&mut self, timeout: Duration) -> TransportResult<bool> {
            self.poll_readable(timeout)
        }

        fn read(&mut self, buffer: &mut [u8], block_first: bool) -> TransportResult<usize> {
            if buffer.is_empty() {
                return Ok(0);
            }
            let mut offset = 0;
            while offset < buffer.len() {
                let timeout = if offset == 0 && !block_first {
                    Duration::ZERO
                } else {
                    SUBSEQUENT_TIMEOUT
                };
                if !self.poll_readable(timeout)? {
                    break;
                }
                let rc = unsafe {
                    libc::read(
                        self.fd,
                        buffer[offset..].as_mut_ptr() as *mut libc::c_void,
                        buffer.len() - offset,
                    )
                };
                if rc == 0 {
                    return Err(TransportError::Disconnected(format!(
                        "rfcomm {}: closed by peer",
                        self.describe()
                    )));
                }
                if rc < 0 {
                    let error = std::io::Error::last_os_error();
                    match error.kind() {
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => break,
                        _ => return Err(TransportError::Disconnected(error.to_string())),
                    }
                }
                offset += rc as usize;
            }
            Ok(offset)
        }

        fn write(&mut self, bytes: &[u8]) -> TransportResult<usize> {
            let mut offset = 0;
            while offset < bytes.len() {
                let rc = unsafe {
                    libc::write(
                        self.fd,
                        bytes[offset..].as_ptr() as *const libc::c_void,
                        bytes.len() - offset,
                    )
                };
                if rc < 0 {
                    let error = std::io::Error::last_os_error();
                    match error.kind() {
                        std::io::ErrorKind::WouldBlock => {
                            return Err(TransportError::Busy("rfcomm write".into()));
                        }
                        std::io::ErrorKind::Interrupted => continue,
                        _ => return Err(TransportError::Disconnected(error.to_string())),
                    }
                }
                offset += rc as usize;
            }
            Ok(offset)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod fallback {
    use std::time::Duration;

    use crate::{Transport, TransportError, TransportResult};

    /// Placeholder for platforms without an RFCOMM stack.
    pub struct RfcommTransport;

    impl RfcommTransport {
        pub fn open(_address: [u8; 6], _channel: u8) -> TransportResult<Self> {
            Err(TransportError::Unsupported("bluetooth on this platform"))
        }
    }

    impl Transport for RfcommTransport {
        fn await_input(&mut self, _timeout: Duration) -> TransportResult<bool> {
            Err(TransportError::Unsupported("bluetooth on this platform"))
        }

        fn read(&mut self, _buffer: &mut [u8], _block_first: bool) -> TransportResult<usize> {
            Err(TransportError::Unsupported("bluetooth on this platform"))
        }

        fn write(&mut self, _bytes: &[u8]) -> TransportResult<usize> {
            Err(TransportError::Unsupported("bluetooth on this platform"))
        }
    }
}
