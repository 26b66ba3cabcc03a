// Point-to-point and broadcast UDP delivery of UTF-8 strings.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::error::{AnonchatError, Result};

/// recv() polls at this granularity so a stopped component notices the
/// shutdown flag promptly without turning the socket into a busy loop.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Binds to `bind_ip` specifically, never the wildcard address, so a
    /// multi-homed host controls which L2 segment receives its broadcasts.
    pub fn new(bind_ip: Ipv4Addr, port: u16, broadcast: bool) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(not(windows))]
        socket.set_reuse_port(true)?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        let addr = SocketAddrV4::new(bind_ip, port);
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

        Ok(Transport {
            socket: socket.into(),
        })
    }

    pub fn send(&self, message: &str, target_ip: Ipv4Addr, target_port: u16) -> Result<()> {
        let addr = SocketAddr::V4(SocketAddrV4::new(target_ip, target_port));
        self.socket.send_to(message.as_bytes(), addr)?;
        Ok(())
    }

    /// Blocks up to one poll interval. Returns `TransportError` wrapping a
    /// `WouldBlock`/`TimedOut` io error on a plain timeout — callers loop on
    /// that to re-check their running flag, which is how shutdown stays
    /// responsive despite `UdpSocket` having no portable cross-thread close.
    pub fn recv(&self, max_bytes: usize) -> Result<(String, Ipv4Addr, u16)> {
        let mut buf = vec![0u8; max_bytes];
        let (n, src) = self.socket.recv_from(&mut buf)?;
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        match src {
            SocketAddr::V4(v4) => Ok((text, *v4.ip(), v4.port())),
            SocketAddr::V6(_) => Err(AnonchatError::ParseError(
                "unexpected IPv6 source address".into(),
            )),
        }
    }

    pub fn is_timeout(err: &AnonchatError) -> bool {
        matches!(err, AnonchatError::TransportError(io_err)
            if io_err.kind() == std::io::ErrorKind::WouldBlock
                || io_err.kind() == std::io::ErrorKind::TimedOut)
    }

    /// No-op beyond bookkeeping: `UdpSocket` has no portable cross-thread
    /// close, so shutdown relies on the read-timeout poll in `recv`
    /// observing a caller's running flag instead. Exists as a uniform
    /// lifecycle hook for callers and a future platform-specific teardown.
    pub fn close(&self) -> Result<()> {
        Ok(())
    }

    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_send_recv_round_trip() {
        let a = Transport::new(Ipv4Addr::LOCALHOST, 0, false).unwrap();
        let a_port = a.socket.local_addr().unwrap().port();
        let b = Transport::new(Ipv4Addr::LOCALHOST, 0, false).unwrap();

        b.send("hello", Ipv4Addr::LOCALHOST, a_port).unwrap();
        let (msg, ip, _port) = a.recv(4096).unwrap();
        assert_eq!(msg, "hello");
        assert_eq!(ip, Ipv4Addr::LOCALHOST);
    }
}
