// src/transport.rs
use log::debug;
use std::future::poll_fn;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::task::Poll;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::{timeout, timeout_at, Instant};

use crate::error::TransportError;

/// Largest datagram we read.
pub const MAX_DATAGRAM: usize = 5 * 1024;

pub fn parse_ipv4(host: &str) -> Option<Ipv4Addr> {
    host.trim().parse().ok()
}

/// Resolves `host` to its first IPv4 address.
pub async fn resolve_host(host: &str, port: u16) -> Result<SocketAddrV4, TransportError> {
    if let Some(ip) = parse_ipv4(host) {
        return Ok(SocketAddrV4::new(ip, port));
    }
    lookup_host((host, port))
        .await
        .map_err(|e| {
            debug!("lookup of {} failed: {}", host, e);
            TransportError::Resolve(host.to_string())
        })?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| TransportError::Resolve(host.to_string()))
}

/// Binds a datagram socket that is ready for its first send.
pub async fn bind_udp(addr: SocketAddrV4) -> Result<UdpSocket, TransportError> {
    let socket = UdpSocket::bind(addr).await?;
    socket.writable().await?;
    Ok(socket)
}

/// Sends without blocking. Returns false if the socket buffer is full.
pub fn send_datagram(
    socket: &UdpSocket,
    data: &[u8],
    to: SocketAddrV4,
) -> Result<bool, TransportError> {
    match socket.try_send_to(data, SocketAddr::V4(to)) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Receives one datagram if any is queued.
pub fn recv_datagram(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> Result<Option<(usize, SocketAddrV4)>, TransportError> {
    loop {
        match socket.try_recv_from(buf) {
            Ok((len, SocketAddr::V4(from))) => return Ok(Some((len, from))),
            // not ours to answer
            Ok((_, SocketAddr::V6(_))) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Sockets waited on together, each carrying a caller tag.
pub struct SocketSet<'a, T> {
    entries: Vec<(&'a UdpSocket, T)>,
}

impl<'a, T> Default for SocketSet<'a, T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<'a, T> SocketSet<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, socket: &'a UdpSocket, tag: T) {
        self.entries.push((socket, tag));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits up to `max_wait` for any socket to become readable, then calls
    /// `on_read` with the tag of every readable socket. Writable sockets are
    /// reported to `on_write` when given.
    ///
    /// Returns the number of callbacks made; zero on timeout.
    pub async fn wait(
        &self,
        max_wait: Duration,
        mut on_read: impl FnMut(&T),
        on_write: Option<&mut dyn FnMut(&T)>,
    ) -> Result<usize, TransportError> {
        if self.entries.is_empty() {
            tokio::time::sleep(max_wait).await;
            return Ok(0);
        }

        let want_write = on_write.is_some();
        let ready = poll_fn(|cx| {
            let mut readable = Vec::new();
            let mut writable = Vec::new();

            for (i, (socket, _)) in self.entries.iter().enumerate() {
                match socket.poll_recv_ready(cx) {
                    Poll::Ready(Ok(())) => readable.push(i),
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => {}
                }
                if want_write {
                    match socket.poll_send_ready(cx) {
                        Poll::Ready(Ok(())) => writable.push(i),
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => {}
                    }
                }
            }

            if readable.is_empty() && writable.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(Ok((readable, writable)))
            }
        });

        let (readable, writable) = match timeout(max_wait, ready).await {
            Err(_) => return Ok(0),
            Ok(result) => result?,
        };

        for &i in &readable {
            on_read(&self.entries[i].1);
        }
        if let Some(on_write) = on_write {
            for &i in &writable {
                on_write(&self.entries[i].1);
            }
        }

        Ok(readable.len() + writable.len())
    }
}

/// Sends `request` over TCP and collects the reply until the peer closes,
/// `limit` bytes are exceeded or `deadline_after` runs out. Hitting the
/// deadline while reading keeps what has arrived so far.
pub async fn recv_tcp_data(
    host: &str,
    port: u16,
    request: &[u8],
    limit: usize,
    deadline_after: Duration,
) -> Result<Vec<u8>, TransportError> {
    let deadline = Instant::now() + deadline_after;
    let timed_out = |_| TransportError::Timeout(deadline_after.as_millis() as u64);

    let addr = timeout_at(deadline, resolve_host(host, port))
        .await
        .map_err(timed_out)??;
    let mut stream = timeout_at(deadline, TcpStream::connect(SocketAddr::V4(addr)))
        .await
        .map_err(timed_out)??;
    timeout_at(deadline, stream.write_all(request))
        .await
        .map_err(timed_out)??;

    let mut content = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let len = match timeout_at(deadline, stream.read(&mut buf)).await {
            Err(_) => break,
            Ok(result) => result?,
        };
        if len == 0 {
            break;
        }
        if content.len() + len > limit {
            return Err(TransportError::TooLarge(limit));
        }
        content.extend_from_slice(&buf[..len]);
    }

    Ok(content)
}
