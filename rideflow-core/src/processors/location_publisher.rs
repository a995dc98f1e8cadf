//! LocationPublisher.
//!
//! Drains the location fan-in fed by every driver socket. Each report is
//! persisted and, while the driver is on a ride, fanned out to the Ride
//! Service.

use crate::events::LocationReportReceiver;
use crate::services::{Fleet, FleetError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct LocationPublisher {
    fleet: Arc<Fleet>,
    rx: LocationReportReceiver,
    shutdown: CancellationToken,
}

impl LocationPublisher {
    pub fn new(fleet: Arc<Fleet>, rx: LocationReportReceiver, shutdown: CancellationToken) -> Self {
        Self { fleet, rx, shutdown }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the LocationPublisher.
    pub async fn run(mut self) {
        info!("LocationPublisher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("LocationPublisher received shutdown signal");
                    break;
                }

                Some(report) = self.rx.recv() => {
                    match self.fleet.report_location(report.driver_id, report.fix).await {
                        Ok(_) => {}
                        Err(FleetError::NotOnline | FleetError::DriverNotFound) => {
                            debug!(driver_id = %report.driver_id, "Dropping location of offline driver");
                        }
                        Err(e) => {
                            warn!(driver_id = %report.driver_id, error = %e, "Failed to record driver location");
                        }
                    }
                }

                else => {
                    info!("Location report channel closed");
                    break;
                }
            }
        }

        info!("LocationPublisher shutdown complete");
    }
}
