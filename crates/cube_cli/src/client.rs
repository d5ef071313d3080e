//! Minimal blocking HTTP client for the Cube command protocol.
//!
//! One request per connection, mirroring the server's one-shot model. The
//! protocol is small enough that a hand-rolled request beats pulling in an
//! HTTP client stack.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{bail, Context, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

pub struct CubeClient {
    pub addr: String,
    pub client_name: String,
}

impl CubeClient {
    pub fn new(addr: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_name: client_name.into(),
        }
    }

    /// Send one command and return the server's reply.
    pub fn send(&self, command: &str) -> Result<Reply> {
        tracing::debug!("sending to {}: {}", self.addr, command);
        let request = format!(
            "POST / HTTP/1.1\r\nHost: {}\r\nX-Client-Name: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.addr,
            self.client_name,
            command.len(),
            command
        );
        let response = self.round_trip(request.as_bytes())?;
        parse_response(&response)
    }

    /// Probe the server's liveness route.
    pub fn ping(&self) -> Result<Reply> {
        let request = format!(
            "GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        let response = self.round_trip(request.as_bytes())?;
        parse_response(&response)
    }

    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>> {
        let addrs: Vec<_> = self
            .addr
            .as_str()
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}", self.addr))?
            .collect();
        let Some(addr) = addrs.first() else {
            bail!("{} resolved to no addresses", self.addr);
        };
        let mut stream = TcpStream::connect_timeout(addr, CONNECT_TIMEOUT)
            .with_context(|| format!("cannot connect to {}", self.addr))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        stream.write_all(request)?;
        stream.flush()?;
        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .context("reading response")?;
        Ok(response)
    }
}

fn parse_response(raw: &[u8]) -> Result<Reply> {
    let text = String::from_utf8_lossy(raw);
    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("malformed response: {:.60}", text))?;
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    Ok(Reply { status, body })
}
