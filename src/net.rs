// ===================== net.rs =====================
//! Byte-stream connections to the collector and the network-link collaborator.

use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::{debug, warn};

use crate::config::Endpoint;

/// An open request/response stream.
pub trait Connection: Read + Write {
    /// After this, a `read` with nothing to deliver fails with
    /// `WouldBlock`/`TimedOut` instead of blocking forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

pub trait Transport {
    type Conn: Connection;

    fn connect(&mut self, endpoint: &Endpoint) -> io::Result<Self::Conn>;
}

/// Plain TCP through the `std::net` stack (lwIP on the device).
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for TcpTransport {
    type Conn = TcpStream;

    fn connect(&mut self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host did not resolve");
        for addr in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
            debug!("🔌 connecting to {addr}");
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    // a stalled collector must not hang a chunk write forever
                    stream.set_write_timeout(Some(self.connect_timeout))?;
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("connect {addr}: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/// Wi-Fi (or whatever carries IP) as seen by the cycle.
pub trait NetworkLink {
    fn is_connected(&mut self) -> bool;

    /// Joins the network with the configured credentials.
    fn connect(&mut self) -> anyhow::Result<()>;
}

/// A link that is always up; the host's own network stack.
pub struct HostLink;

impl NetworkLink for HostLink {
    fn is_connected(&mut self) -> bool {
        true
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_transport_reaches_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let ep = Endpoint { host: "127.0.0.1".into(), port, path: "/upload".into() };

        let mut t = TcpTransport::new(Duration::from_secs(2));
        let mut conn = t.connect(&ep).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        conn.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server_side.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn tcp_transport_reports_refused_connection() {
        // bind then drop so the port is very likely closed
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let ep = Endpoint { host: "127.0.0.1".into(), port, path: "/upload".into() };
        assert!(TcpTransport::new(Duration::from_secs(1)).connect(&ep).is_err());
    }
}
