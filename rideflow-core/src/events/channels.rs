use super::types::LocationReport;
use tokio::sync::mpsc;

/// Buffer of the location fan-in.
///
/// Sized for bursts from many drivers at a ~3 s cadence.
pub const DEFAULT_CHANNEL_BUFFER: usize = 1024;

/// Sender handle for LocationReport events. Cloned into every driver socket.
pub type LocationReportSender = mpsc::Sender<LocationReport>;
/// Receiver handle for LocationReport events.
pub type LocationReportReceiver = mpsc::Receiver<LocationReport>;

/// Create the location fan-in channel.
pub fn location_report_channel() -> (LocationReportSender, LocationReportReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
