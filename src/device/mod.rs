pub mod battery;
pub mod control;
pub mod mode;

use std::future::Future;
use std::time::Duration;

use bluer::Address;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bluetooth::{RfcommConnection, ServiceDiscovery, ServiceResolver};
use crate::error::Result;
use crate::protocol::commands::{HANDS_FREE_UUID, SONY_CONTROL_UUID};
pub use battery::{BatterySample, BatterySession};
pub use mode::ModeCommand;

/// Connection tunables for a headset.
#[derive(Debug, Clone, Copy)]
pub struct HeadsetOptions {
    pub connect_timeout: Duration,
    pub battery_fallback_port: u8,
}

/// A selected headset. Every action resolves its endpoint afresh and owns its
/// socket for its whole lifetime, so a battery poll and a mode change can run
/// concurrently without sharing anything.
pub struct Headset<D> {
    address: Address,
    resolver: ServiceResolver<D>,
    options: HeadsetOptions,
}

impl<D: ServiceDiscovery> Headset<D> {
    pub fn new(address: Address, discovery: D, options: HeadsetOptions) -> Self {
        Self {
            address,
            resolver: ServiceResolver::new(discovery),
            options,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Switch the ambient sound mode. Fire-and-forget: success means the
    /// packet was written without an I/O error.
    pub async fn set_mode(&self, mode: ModeCommand) -> Result<()> {
        let packet = mode.encode();
        info!(
            "Setting {} to {} ({}, checksum {:#04x})",
            self.address,
            mode,
            packet,
            packet.checksum()
        );

        let endpoint = self.resolver.resolve(self.address, SONY_CONTROL_UUID).await?;
        control::send_mode(endpoint, &packet, self.options.connect_timeout).await
    }

    /// Run one battery session, cancelled when `stop` resolves.
    pub async fn poll_battery<F: Future<Output = ()>>(&self, stop: F) -> Result<BatterySample> {
        let port = self
            .resolver
            .resolve_port_only(
                self.address,
                HANDS_FREE_UUID,
                self.options.battery_fallback_port,
            )
            .await;

        let stream = RfcommConnection::connect(self.address, port, self.options.connect_timeout)
            .await?
            .into_inner();
        BatterySession::new(stream).run_until(stop).await
    }

    /// Poll the battery every `interval` until `shutdown` flips to true.
    ///
    /// Each poll is an independent session bounded by `timeout`. Offline
    /// results back off exponentially up to `max_backoff`; any other result
    /// resets to `interval`. Every result is handed to `on_sample`.
    pub async fn watch_battery<F>(
        &self,
        interval: Duration,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
        mut on_sample: F,
    ) where
        F: FnMut(&Result<BatterySample>),
    {
        let max_backoff = interval.max(Duration::from_secs(300));
        let mut delay = interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let stop = {
                let shutdown = shutdown.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(timeout) => {}
                        _ = stopped(shutdown) => {}
                    }
                }
            };
            let result = self.poll_battery(stop).await;

            delay = match &result {
                Err(e) if e.is_offline() => {
                    let next = (delay * 2).min(max_backoff);
                    warn!("Headset offline ({}), next poll in {:?}", e, next);
                    next
                }
                _ => interval,
            };
            on_sample(&result);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(shutdown.clone()) => break,
            }
        }
        info!("Battery watch stopped");
    }
}

/// Resolves once the shutdown flag is set. Pends forever if the sender is gone.
pub async fn stopped(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
