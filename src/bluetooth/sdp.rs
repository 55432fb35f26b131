use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bluer::Address;
use tracing::debug;
use uuid::Uuid;

use super::l2cap::L2capSocket;
use super::resolver::{ServiceDiscovery, ServiceMatch};
use crate::error::{Error, Result};
use crate::protocol::sdp::{self, ServiceRecord, SDP_PSM};

/// Continuation rounds before we give up on a misbehaving server.
const MAX_CONTINUATIONS: usize = 32;

/// SDP client speaking directly to the device's SDP server over L2CAP.
pub struct SdpDiscovery {
    timeout: Duration,
    transaction: AtomicU16,
}

impl SdpDiscovery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            transaction: AtomicU16::new(1),
        }
    }

    async fn query(&self, address: Address, uuid: Uuid) -> Result<Vec<ServiceRecord>> {
        let socket = L2capSocket::connect(address, SDP_PSM, self.timeout)
            .await
            .map_err(Error::DeviceOffline)?;

        let mut lists = Vec::new();
        let mut continuation = Vec::new();
        let mut buf = [0u8; 1024];

        for _ in 0..MAX_CONTINUATIONS {
            let tid = self.transaction.fetch_add(1, Ordering::Relaxed);
            let request = sdp::search_attribute_request(tid, uuid, &continuation);
            socket.send(&request).await?;

            let n = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
                .await
                .map_err(|_| Error::Sdp("response timed out".into()))??;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            let response = sdp::parse_attribute_response(&buf[..n])?;
            if response.transaction_id != tid {
                return Err(Error::Sdp(format!(
                    "transaction mismatch: sent {tid}, got {}",
                    response.transaction_id
                )));
            }
            debug!(
                "SDP fragment: {} bytes, continuation {:?}",
                response.attribute_lists.len(),
                response.continuation
            );

            lists.extend_from_slice(&response.attribute_lists);
            if response.continuation.is_empty() {
                return sdp::parse_records(&lists);
            }
            continuation = response.continuation;
        }

        Err(Error::Sdp("too many continuation rounds".into()))
    }
}

#[async_trait]
impl ServiceDiscovery for SdpDiscovery {
    async fn find_services(&self, address: Address, uuid: Uuid) -> Result<Vec<ServiceMatch>> {
        let records = self.query(address, uuid).await?;
        Ok(records
            .iter()
            .map(|record| {
                let (protocol, port) = record.endpoint();
                ServiceMatch {
                    host: address,
                    name: record.name().map(str::to_string),
                    protocol,
                    port,
                }
            })
            .collect())
    }
}
