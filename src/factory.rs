//! Factory / dispatch (C5): turns an initial `RRQ`/`WRQ` plus an
//! already-bound transport and backing store into a ready-to-run bootstrap
//! session (spec §4.5).

use std::net::SocketAddr;

use bytes::Bytes;
use log::error;

use crate::backing::{Reader, Writer};
use crate::bootstrap::{RemoteOriginReadSession, RemoteOriginWriteSession};
use crate::codec::{self, ErrorCode, Packet, Request};
use crate::error::Error;
use crate::transport::Transport;

/// The two request shapes a listener can hand to the factory.
pub enum IncomingRequest {
    Read(Request),
    Write(Request),
}

/// Builds the session for `request`, arriving from `peer` on
/// `original_transport` (the well-known-port socket), using `ephemeral`
/// (a freshly bound per-transfer socket) to actually run the transfer.
///
/// `open_backing` constructs the `Reader` or `Writer` for `request`'s
/// filename; opening the file itself is out of scope for this crate (spec
/// §1), so it is supplied by the caller. A `FileNotFound`/`AccessViolation`
/// failure from it is reported as an `ERROR` on `original_transport`, the
/// only packet this crate ever sends on that socket rather than the
/// session's own ephemeral one (spec §4.5).
pub async fn dispatch<ReadF, WriteF>(
    request: IncomingRequest,
    peer: SocketAddr,
    original_transport: &dyn Transport,
    ephemeral: Box<dyn Transport>,
    open_reader: impl FnOnce(&Bytes) -> ReadF,
    open_writer: impl FnOnce(&Bytes) -> WriteF,
) -> Result<(), Error>
where
    ReadF: std::future::Future<Output = Result<Box<dyn Reader>, Error>>,
    WriteF: std::future::Future<Output = Result<Box<dyn Writer>, Error>>,
{
    match request {
        IncomingRequest::Read(req) => {
            let reader = match open_reader(&req.filename).await {
                Ok(reader) => reader,
                Err(e) => return reject(original_transport, peer, e).await,
            };
            let session = RemoteOriginReadSession::new(ephemeral, peer, req.options, reader);
            session.run().await
        }
        IncomingRequest::Write(req) => {
            let writer = match open_writer(&req.filename).await {
                Ok(writer) => writer,
                Err(e) => return reject(original_transport, peer, e).await,
            };
            let session = RemoteOriginWriteSession::new(ephemeral, peer, req.options, writer);
            session.run().await
        }
    }
}

async fn reject(transport: &dyn Transport, peer: SocketAddr, err: Error) -> Result<(), Error> {
    let code = err.wire_error_code().unwrap_or(ErrorCode::NotDefined);
    error!("rejecting request from {peer}: {err}");
    let packet = Packet::Error {
        code,
        message: Bytes::from_static(code.default_message()),
    };
    transport.send_to(codec::encode(&packet), peer).await?;
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackingError;
    use crate::options::OptionMap;
    use crate::testutil::{FakeTransport, MemoryReader};
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    struct ArcTransport(Arc<FakeTransport>);

    impl Transport for ArcTransport {
        fn send_to(
            &self,
            buf: Bytes,
            target: SocketAddr,
        ) -> crate::backing::BoxFuture<'_, usize> {
            self.0.send_to(buf, target)
        }
        fn recv_from(&self) -> crate::backing::BoxFuture<'_, (Bytes, SocketAddr)> {
            self.0.recv_from()
        }
        fn local_addr(&self) -> Result<SocketAddr, Error> {
            self.0.local_addr()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_is_reported_on_original_socket() {
        let peer = addr(6200);
        let well_known = Arc::new(FakeTransport::new(addr(69)));
        let ephemeral = Arc::new(FakeTransport::new(addr(7200)));

        let request = IncomingRequest::Read(Request {
            filename: Bytes::from_static(b"missing.txt"),
            mode: Bytes::from_static(b"octet"),
            options: OptionMap::new(),
        });

        let err = dispatch(
            request,
            peer,
            &ArcTransport(well_known.clone()),
            Box::new(ArcTransport(ephemeral)),
            |_name| async { Err::<Box<dyn Reader>, Error>(Error::BackingStore(BackingError::FileNotFound)) },
            |_name| async { unreachable!("read request never opens a writer") },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::BackingStore(BackingError::FileNotFound)));
        let sent = well_known.sent();
        assert_eq!(sent.len(), 1);
        match codec::decode(&sent[0].0).unwrap() {
            Packet::Error { code, .. } => assert_eq!(code, ErrorCode::FileNotFound),
            _ => panic!("expected ERROR"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn read_request_builds_and_runs_a_remote_origin_read_session() {
        let peer = addr(6201);
        let well_known = Arc::new(FakeTransport::new(addr(69)));
        let ephemeral = Arc::new(FakeTransport::new(addr(7201)));
        ephemeral.push_incoming(codec::encode(&Packet::Ack { block: 1 }), peer);

        let request = IncomingRequest::Read(Request {
            filename: Bytes::from_static(b"f.txt"),
            mode: Bytes::from_static(b"octet"),
            options: OptionMap::new(),
        });

        dispatch(
            request,
            peer,
            &ArcTransport(well_known),
            Box::new(ArcTransport(ephemeral.clone())),
            |_name| async { Ok(Box::new(MemoryReader::new(&b"hi"[..])) as Box<dyn Reader>) },
            |_name| async { unreachable!() },
        )
        .await
        .unwrap();

        assert_eq!(ephemeral.sent().len(), 1);
    }
}
