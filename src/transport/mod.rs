//! Outbound transports.
//!
//! The only collaborator reached from here is the behavior logger, which
//! receives tracked positions over UDP.

mod telemetry;

pub use telemetry::{NullSink, PositionSink, UdpTelemetry};
