use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::bluetooth::{RfcommConnection, ServiceEndpoint};
use crate::error::{Error, Result};
use crate::protocol::ControlPacket;

/// Write one control packet. The device never acknowledges, so nothing is read back.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &ControlPacket) -> Result<()> {
    debug!("TX: {}", packet);
    writer
        .write_all(packet.as_bytes())
        .await
        .map_err(Error::WriteFailed)?;
    writer.flush().await.map_err(Error::WriteFailed)
}

/// Open the control channel, send `packet`, close.
pub async fn send_mode(
    endpoint: ServiceEndpoint,
    packet: &ControlPacket,
    connect_timeout: Duration,
) -> Result<()> {
    let mut stream = RfcommConnection::connect(endpoint.host, endpoint.port, connect_timeout)
        .await?
        .into_inner();

    let result = write_packet(&mut stream, packet).await;
    let _ = stream.shutdown().await;

    if result.is_ok() {
        info!("Wrote {} bytes to {}", packet.as_bytes().len(), endpoint);
    }
    result
}
