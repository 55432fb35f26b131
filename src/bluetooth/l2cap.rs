use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use bluer::Address;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_L2CAP: libc::c_int = 0;

/// sockaddr_l2 for L2CAP sockets (from <bluetooth/l2cap.h>)
#[repr(C)]
struct SockaddrL2 {
    l2_family: u16,
    l2_psm: u16,        // PSM in little-endian
    l2_bdaddr: [u8; 6], // BT address in little-endian
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

/// L2CAP connection to a device (SEQPACKET, preserves message boundaries).
/// Used for SDP, where each PDU is exactly one packet.
pub struct L2capSocket {
    fd: AsyncFd<OwnedFd>,
}

impl L2capSocket {
    /// Connect to a device via L2CAP on the given PSM.
    pub async fn connect(address: Address, psm: u16, timeout: Duration) -> std::io::Result<Self> {
        debug!("Connecting to {} on L2CAP PSM 0x{:04X}", address, psm);

        let addr_bytes = address.0;

        let raw_fd = tokio::task::spawn_blocking(move || -> std::io::Result<OwnedFd> {
            unsafe {
                let fd = libc::socket(AF_BLUETOOTH, libc::SOCK_SEQPACKET, BTPROTO_L2CAP);
                if fd < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                let owned = OwnedFd::from_raw_fd(fd);

                set_timeouts(fd, timeout);

                // Build sockaddr_l2 with address in little-endian
                let mut l2_bdaddr = addr_bytes;
                l2_bdaddr.reverse();

                let addr = SockaddrL2 {
                    l2_family: AF_BLUETOOTH as u16,
                    l2_psm: psm.to_le(),
                    l2_bdaddr,
                    l2_cid: 0,
                    l2_bdaddr_type: 0, // BR/EDR
                };

                let ret = libc::connect(
                    fd,
                    &addr as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
                );
                if ret < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                // Set non-blocking for tokio
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);

                Ok(owned)
            }
        })
        .await
        .map_err(std::io::Error::other)??;

        info!("Connected to {} on L2CAP PSM 0x{:04X}", address, psm);
        Ok(Self {
            fd: AsyncFd::new(raw_fd)?,
        })
    }

    /// Send one L2CAP packet.
    pub async fn send(&self, data: &[u8]) -> std::io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let n = unsafe {
                    libc::send(
                        inner.get_ref().as_raw_fd(),
                        data.as_ptr() as *const libc::c_void,
                        data.len(),
                        0,
                    )
                };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(())
                }
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one L2CAP packet. Returns 0 on EOF.
    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let n = unsafe {
                    libc::recv(
                        inner.get_ref().as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        0,
                    )
                };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Bound the blocking connect (and any blocking I/O) on a raw socket.
pub(crate) unsafe fn set_timeouts(fd: libc::c_int, timeout: Duration) {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    for opt in [libc::SO_SNDTIMEO, libc::SO_RCVTIMEO] {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        );
    }
}
