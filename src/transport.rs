//! Datagram transport abstraction. A session is generic over this trait so
//! tests can swap in an in-memory double instead of a bound UDP socket
//! (spec §5 "the transport").

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::backing::BoxFuture;
use crate::codec::{self, ErrorCode, Packet};
use crate::error::Error;

/// A connectionless datagram endpoint. Each session owns one exclusively
/// for its lifetime (spec §5 "Shared resources: none").
pub trait Transport: Send {
    fn send_to(&self, buf: Bytes, target: SocketAddr) -> BoxFuture<'_, usize>;
    fn recv_from(&self) -> BoxFuture<'_, (Bytes, SocketAddr)>;
    fn local_addr(&self) -> Result<SocketAddr, Error>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket) -> Self {
        UdpTransport { socket }
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, buf: Bytes, target: SocketAddr) -> BoxFuture<'_, usize> {
        Box::pin(async move { Ok(self.socket.send_to(&buf, target).await?) })
    }

    fn recv_from(&self) -> BoxFuture<'_, (Bytes, SocketAddr)> {
        Box::pin(async move {
            let mut buf = vec![0u8; 65507];
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok((Bytes::from(buf), addr))
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

/// Receives the next datagram addressed to `remote`, transparently
/// answering any other sender with `ERROR(5, "unknown transfer ID")` and
/// continuing to wait (spec §4.4 "TID guard").
pub async fn recv_guarded(
    transport: &dyn Transport,
    remote: SocketAddr,
) -> Result<Bytes, Error> {
    loop {
        let (buf, from) = transport.recv_from().await?;
        if from == remote {
            return Ok(buf);
        }
        log::warn!("dropping datagram from unexpected TID {from}, expected {remote}");
        let reply = codec::encode(&Packet::Error {
            code: ErrorCode::UnknownTransferId,
            message: Bytes::from_static(ErrorCode::UnknownTransferId.default_message()),
        });
        let _ = transport.send_to(reply, from).await;
    }
}
