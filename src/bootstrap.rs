//! Bootstrap layer (C4): option negotiation, the handshake watchdog, and
//! the remote-TID guard, wrapped around the four concrete session shapes
//! (spec §4.4).

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{trace, warn};

use crate::backing::{Reader, Writer};
use crate::codec::{self, Packet, Request};
use crate::error::Error;
use crate::negotiate::{self, NegotiatedOptions, Role};
use crate::options::OptionMap;
use crate::session::{ReadSession, WriteSession};
use crate::transport::{self, Transport};

/// Outcome of waiting for a handshake reply: either the datagram
/// `matches_reply` was looking for, or a peer `ERROR` that ends the
/// handshake immediately (spec §7 "Receipt of any ERROR packet terminates
/// the local session silently").
enum HandshakeReply {
    Matched(Bytes),
    Terminated,
}

/// Sends `outgoing` and waits for a reply accepted by `matches_reply`,
/// retransmitting on `schedule` and filtering by TID (spec §4.4 "retransmit
/// it on the standard schedule until the peer's first data-plane packet").
/// Returns the raw bytes of the matching datagram so a write-side caller
/// can feed it straight into `WriteSession` as a seed.
async fn handshake_send_and_wait(
    transport: &dyn Transport,
    remote: SocketAddr,
    outgoing: &Packet,
    schedule: &[Duration],
    matches_reply: impl Fn(&Packet) -> bool,
) -> Result<HandshakeReply, Error> {
    let wire = codec::encode(outgoing);
    let mut attempt = 0usize;
    loop {
        transport.send_to(wire.clone(), remote).await?;
        let deadline = schedule[attempt];
        let outcome = tokio::time::timeout(deadline, async {
            loop {
                let buf = transport::recv_guarded(transport, remote).await?;
                match codec::decode(&buf) {
                    Ok(packet) if matches_reply(&packet) => {
                        trace!("received handshake reply from {remote}");
                        return Ok(HandshakeReply::Matched(buf));
                    }
                    Ok(Packet::Error { code, message }) => {
                        warn!(
                            "peer {remote} sent ERROR({code:?}) during handshake: {}",
                            String::from_utf8_lossy(&message)
                        );
                        return Ok(HandshakeReply::Terminated);
                    }
                    _ => continue,
                }
            }
        })
        .await;
        match outcome {
            Ok(result) => return result,
            Err(_elapsed) => {
                attempt += 1;
                warn!("handshake with {remote} timed out, attempt {attempt}");
                if attempt >= schedule.len() {
                    return Err(Error::Timeout);
                }
            }
        }
    }
}

/// Sends an initial RRQ/WRQ to a well-known server address and waits for
/// its first reply, learning the peer's ephemeral TID from the reply's
/// source address — there is no TID to guard against yet (spec §4.4
/// "Local-origin").
async fn send_request_and_learn_tid(
    transport: &dyn Transport,
    server: SocketAddr,
    request: &Packet,
    schedule: &[Duration],
) -> Result<(Bytes, SocketAddr), Error> {
    let wire = codec::encode(request);
    let mut attempt = 0usize;
    loop {
        transport.send_to(wire.clone(), server).await?;
        let deadline = schedule[attempt];
        match tokio::time::timeout(deadline, transport.recv_from()).await {
            Ok(result) => return result,
            Err(_elapsed) => {
                attempt += 1;
                warn!("handshake with {server} timed out, attempt {attempt}");
                if attempt >= schedule.len() {
                    return Err(Error::Timeout);
                }
            }
        }
    }
}

/// We initiated an RRQ: we receive the file, so the underlying transfer
/// runs the write-side FSM against our own `Writer` (spec §4.4
/// "Local-origin read").
pub struct LocalOriginReadSession {
    transport: Box<dyn Transport>,
    server: SocketAddr,
    filename: Bytes,
    mode: Bytes,
    requested_options: OptionMap,
    writer: Box<dyn Writer>,
}

impl LocalOriginReadSession {
    pub fn new(
        transport: Box<dyn Transport>,
        server: SocketAddr,
        filename: Bytes,
        mode: Bytes,
        requested_options: OptionMap,
        writer: Box<dyn Writer>,
    ) -> Self {
        LocalOriginReadSession {
            transport,
            server,
            filename,
            mode,
            requested_options,
            writer,
        }
    }

    pub async fn run(self) -> Result<(), Error> {
        let schedule = NegotiatedOptions::default().timeout;
        let request = Packet::Rrq(Request {
            filename: self.filename,
            mode: self.mode,
            options: self.requested_options,
        });
        let (buf, remote) =
            send_request_and_learn_tid(self.transport.as_ref(), self.server, &request, &schedule)
                .await?;

        match codec::decode(&buf) {
            Ok(Packet::Oack(accepted)) => {
                let negotiated = negotiate::from_accepted(&accepted);
                self.transport
                    .send_to(codec::encode(&Packet::Ack { block: 0 }), remote)
                    .await?;
                let session = WriteSession::new(self.transport, remote, self.writer, &negotiated);
                session.run_seeded(None).await
            }
            Ok(Packet::Data { block: 1, .. }) => {
                let negotiated = NegotiatedOptions::default();
                let session = WriteSession::new(self.transport, remote, self.writer, &negotiated);
                session.run_seeded(Some(buf)).await
            }
            Ok(Packet::Error { code, message }) => {
                warn!(
                    "peer refused RRQ with ERROR({code:?}): {}",
                    String::from_utf8_lossy(&message)
                );
                Ok(())
            }
            _ => Err(Error::WireProtocol),
        }
    }
}

/// We initiated a WRQ: we send the file, so the transfer runs the
/// read-side FSM against our own `Reader` (spec §4.4 "Local-origin write").
pub struct LocalOriginWriteSession {
    transport: Box<dyn Transport>,
    server: SocketAddr,
    filename: Bytes,
    mode: Bytes,
    requested_options: OptionMap,
    reader: Box<dyn Reader>,
}

impl LocalOriginWriteSession {
    pub fn new(
        transport: Box<dyn Transport>,
        server: SocketAddr,
        filename: Bytes,
        mode: Bytes,
        requested_options: OptionMap,
        reader: Box<dyn Reader>,
    ) -> Self {
        LocalOriginWriteSession {
            transport,
            server,
            filename,
            mode,
            requested_options,
            reader,
        }
    }

    pub async fn run(self) -> Result<(), Error> {
        let schedule = NegotiatedOptions::default().timeout;
        let request = Packet::Wrq(Request {
            filename: self.filename,
            mode: self.mode,
            options: self.requested_options,
        });
        let (buf, remote) =
            send_request_and_learn_tid(self.transport.as_ref(), self.server, &request, &schedule)
                .await?;

        match codec::decode(&buf) {
            Ok(Packet::Oack(accepted)) => {
                let negotiated = negotiate::from_accepted(&accepted);
                let session = ReadSession::new(self.transport, remote, self.reader, &negotiated);
                session.run().await
            }
            Ok(Packet::Ack { block: 0 }) => {
                let negotiated = NegotiatedOptions::default();
                let session = ReadSession::new(self.transport, remote, self.reader, &negotiated);
                session.run().await
            }
            Ok(Packet::Error { code, message }) => {
                warn!(
                    "peer refused WRQ with ERROR({code:?}): {}",
                    String::from_utf8_lossy(&message)
                );
                Ok(())
            }
            _ => Err(Error::WireProtocol),
        }
    }
}

/// Peer sent us an RRQ: it receives the file, we drive the read-side FSM
/// against our `Reader` (spec §4.4 "Remote-origin read").
pub struct RemoteOriginReadSession {
    transport: Box<dyn Transport>,
    remote: SocketAddr,
    request_options: OptionMap,
    reader: Box<dyn Reader>,
}

impl RemoteOriginReadSession {
    pub fn new(
        transport: Box<dyn Transport>,
        remote: SocketAddr,
        request_options: OptionMap,
        reader: Box<dyn Reader>,
    ) -> Self {
        RemoteOriginReadSession {
            transport,
            remote,
            request_options,
            reader,
        }
    }

    pub async fn run(self) -> Result<(), Error> {
        let (accepted, negotiated) =
            negotiate::process_options(&self.request_options, Role::Read, self.reader.size());

        if !accepted.is_empty() {
            let reply = handshake_send_and_wait(
                self.transport.as_ref(),
                self.remote,
                &Packet::Oack(accepted),
                &negotiated.timeout,
                |p| matches!(p, Packet::Ack { block: 0 }),
            )
            .await?;
            if matches!(reply, HandshakeReply::Terminated) {
                return Ok(());
            }
        }

        let session = ReadSession::new(self.transport, self.remote, self.reader, &negotiated);
        session.run().await
    }
}

/// Peer sent us a WRQ: it sends the file, we drive the write-side FSM
/// against our `Writer` (spec §4.4 "Remote-origin write").
pub struct RemoteOriginWriteSession {
    transport: Box<dyn Transport>,
    remote: SocketAddr,
    request_options: OptionMap,
    writer: Box<dyn Writer>,
}

impl RemoteOriginWriteSession {
    pub fn new(
        transport: Box<dyn Transport>,
        remote: SocketAddr,
        request_options: OptionMap,
        writer: Box<dyn Writer>,
    ) -> Self {
        RemoteOriginWriteSession {
            transport,
            remote,
            request_options,
            writer,
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        let (accepted, negotiated) =
            negotiate::process_options(&self.request_options, Role::Write, None);

        let seed = if !accepted.is_empty() {
            let reply = handshake_send_and_wait(
                self.transport.as_ref(),
                self.remote,
                &Packet::Oack(accepted),
                &negotiated.timeout,
                |p| matches!(p, Packet::Data { block: 1, .. }),
            )
            .await?;
            match reply {
                HandshakeReply::Matched(buf) => Some(buf),
                HandshakeReply::Terminated => return Ok(()),
            }
        } else {
            self.transport
                .send_to(codec::encode(&Packet::Ack { block: 0 }), self.remote)
                .await?;
            None
        };

        if let Some(tsize) = negotiated.tsize {
            self.writer.set_tsize(tsize);
        }

        let session = WriteSession::new(self.transport, self.remote, self.writer, &negotiated);
        session.run_seeded(seed).await
    }
}
