//! Test doubles shared across `session` and `bootstrap` unit tests.
//! Grounded in `examples/original_source/tftp/test/test_bootstrap.py`'s
//! `FakeTransport`/`DelayedReader`/`DelayedWriter`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::backing::{BoxFuture, Reader, Writer};
use crate::transport::Transport;

/// An in-memory `Transport`: outgoing datagrams land in `sent`, incoming
/// ones are fed via `push_incoming` and drained in FIFO order.
pub struct FakeTransport {
    local: SocketAddr,
    sent: Mutex<Vec<(Bytes, SocketAddr)>>,
    incoming: Mutex<VecDeque<(Bytes, SocketAddr)>>,
    notify: Notify,
}

impl FakeTransport {
    pub fn new(local: SocketAddr) -> Self {
        FakeTransport {
            local,
            sent: Mutex::new(Vec::new()),
            incoming: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push_incoming(&self, buf: Bytes, from: SocketAddr) {
        self.incoming.lock().unwrap().push_back((buf, from));
        self.notify.notify_one();
    }

    pub fn sent(&self) -> Vec<(Bytes, SocketAddr)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn send_to(&self, buf: Bytes, target: SocketAddr) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let len = buf.len();
            self.sent.lock().unwrap().push((buf, target));
            Ok(len)
        })
    }

    fn recv_from(&self) -> BoxFuture<'_, (Bytes, SocketAddr)> {
        Box::pin(async move {
            loop {
                if let Some(item) = self.incoming.lock().unwrap().pop_front() {
                    return Ok(item);
                }
                self.notify.notified().await;
            }
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, crate::error::Error> {
        Ok(self.local)
    }
}

/// A `Reader` over an in-memory byte buffer.
pub struct MemoryReader {
    data: Bytes,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        MemoryReader { data: data.into() }
    }
}

impl Reader for MemoryReader {
    fn read_block(&mut self, block: u16, size: usize) -> BoxFuture<'_, Bytes> {
        Box::pin(async move {
            let start = (block as usize - 1) * size;
            if start >= self.data.len() {
                return Ok(Bytes::new());
            }
            let end = (start + size).min(self.data.len());
            Ok(self.data.slice(start..end))
        })
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// A `Writer` that accumulates blocks into an in-memory buffer.
#[derive(Default)]
pub struct MemoryWriter {
    pub buf: Vec<u8>,
    pub finished: bool,
    pub cancelled: bool,
    pub tsize: Option<u64>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        MemoryWriter::default()
    }
}

impl Writer for MemoryWriter {
    fn write_block(&mut self, _block: u16, payload: Bytes) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.buf.extend_from_slice(&payload);
            Ok(())
        })
    }

    fn finish(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.finished = true;
            Ok(())
        })
    }

    fn cancel(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancelled = true;
            Ok(())
        })
    }

    fn set_tsize(&mut self, tsize: u64) {
        self.tsize = Some(tsize);
    }
}
