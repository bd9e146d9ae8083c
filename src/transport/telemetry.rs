//! Position telemetry to the behavior logger.
//!
//! One UDP datagram per sampled tick, ASCII `"x,y"`. Delivery is best effort:
//! the logger tolerates gaps, and a lost datagram never blocks capture.

use anyhow::{Context, Result};
use std::net::{SocketAddr, UdpSocket};

use crate::track::Position;

/// Destination for sampled positions.
pub trait PositionSink: Send {
    fn publish(&mut self, position: Position) -> Result<()>;
}

/// UDP publisher bound to an ephemeral local port.
pub struct UdpTelemetry {
    socket: UdpSocket,
    target: SocketAddr,
    sent: u64,
}

impl UdpTelemetry {
    pub fn new(target: SocketAddr) -> Result<Self> {
        let bind_addr: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind_addr).context("bind telemetry socket")?;
        Ok(Self {
            socket,
            target,
            sent: 0,
        })
    }

    /// Datagrams handed to the OS since creation.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl PositionSink for UdpTelemetry {
    fn publish(&mut self, position: Position) -> Result<()> {
        let payload = position.to_payload();
        self.socket
            .send_to(payload.as_bytes(), self.target)
            .with_context(|| format!("send position to {}", self.target))?;
        self.sent += 1;
        Ok(())
    }
}

/// Sink that drops every position, for running without a behavior logger.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl PositionSink for NullSink {
    fn publish(&mut self, _position: Position) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sends_ascii_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut telemetry = UdpTelemetry::new(receiver.local_addr().unwrap()).unwrap();

        telemetry.publish(Position::new(321, 45)).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"321,45");
        assert_eq!(telemetry.sent(), 1);
    }
}
