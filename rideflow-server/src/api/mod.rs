//! HTTP and WebSocket surfaces of both services.

pub mod drivers;
pub mod extractors;
pub mod realtime;
pub mod rides;
