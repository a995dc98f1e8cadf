//! In-process event plumbing.
//!
//! Driver sockets push [`LocationReport`]s into one fan-in channel. The
//! `LocationPublisher` drains it and hands each report to the fleet, which
//! persists and forwards it. The HTTP location endpoint calls the fleet
//! directly because it answers with the stored coordinate id.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, LocationReportReceiver, LocationReportSender, location_report_channel,
};
pub use types::LocationReport;
