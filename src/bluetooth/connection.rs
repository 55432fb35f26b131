use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::time::Duration;

use bluer::Address;
use tokio::net::UnixStream;
use tracing::info;

use super::l2cap::set_timeouts;
use crate::error::{Error, Result};

// Bluetooth socket constants (from Linux kernel headers)
const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_RFCOMM: libc::c_int = 3;

/// sockaddr_rc: RFCOMM socket address (from <bluetooth/rfcomm.h>)
#[repr(C)]
struct SockaddrRc {
    rc_family: u16,
    rc_bdaddr: [u8; 6], // Bluetooth address in little-endian
    rc_channel: u8,
}

/// RFCOMM connection to a device.
///
/// Connects with a blocking socket so the RFCOMM DLC handshake has completed
/// before we return, then hands the fd to tokio for the read/write phase.
/// Each connection owns its socket exclusively; dropping it closes the socket.
pub struct RfcommConnection {
    stream: UnixStream,
}

impl RfcommConnection {
    /// Connect to a device via RFCOMM on the given channel.
    pub async fn connect(address: Address, channel: u8, timeout: Duration) -> Result<Self> {
        info!("Connecting to {} on RFCOMM channel {}", address, channel);

        let addr_bytes = address.0; // [u8; 6] in big-endian

        let connected = tokio::task::spawn_blocking(move || -> std::io::Result<OwnedFd> {
            unsafe {
                let fd = libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM);
                if fd < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                // Closed on every early return below
                let owned = OwnedFd::from_raw_fd(fd);

                set_timeouts(fd, timeout);

                let mut rc_bdaddr = addr_bytes;
                rc_bdaddr.reverse(); // Big-endian -> little-endian for BlueZ
                let addr = SockaddrRc {
                    rc_family: AF_BLUETOOTH as u16,
                    rc_bdaddr,
                    rc_channel: channel,
                };

                let ret = libc::connect(
                    fd,
                    &addr as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
                );
                if ret < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                // Set non-blocking for tokio async I/O
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);

                Ok(owned)
            }
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r);

        let owned = connected.map_err(|source| Error::ConnectFailed {
            address,
            channel,
            source,
        })?;

        // UnixStream is just an AsyncFd wrapper: works for any stream socket
        let std_stream =
            unsafe { std::os::unix::net::UnixStream::from_raw_fd(owned.into_raw_fd()) };
        let stream = UnixStream::from_std(std_stream)?;

        info!("Connected to {} on RFCOMM channel {}", address, channel);
        Ok(Self { stream })
    }

    pub fn into_inner(self) -> UnixStream {
        self.stream
    }
}
