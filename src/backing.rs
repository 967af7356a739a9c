//! Backing-store interface (C2): the abstract reader/writer a session
//! drives (spec §4.2). Filesystem, in-memory or network-backed
//! implementations all live outside this crate.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Source of DATA payloads for a read session. Blocks are 1-indexed;
/// returning fewer than `size` bytes signals end-of-stream.
pub trait Reader: Send {
    fn read_block(&mut self, block: u16, size: usize) -> BoxFuture<'_, Bytes>;

    /// Total size in bytes, if known up front — used to answer a `tsize=0`
    /// query (spec §4.4).
    fn size(&self) -> Option<u64>;
}

/// Sink for DATA payloads on a write session.
pub trait Writer: Send {
    fn write_block(&mut self, block: u16, payload: Bytes) -> BoxFuture<'_, ()>;

    /// Flushes and closes the backing on the last block.
    fn finish(&mut self) -> BoxFuture<'_, ()>;

    /// Discards partial state; called on cancellation or a terminal error.
    fn cancel(&mut self) -> BoxFuture<'_, ()>;

    /// Records the negotiated `tsize`, if any, as a preallocation hint.
    /// Applied when the first DATA arrives, not at negotiation time
    /// (spec §4.4).
    fn set_tsize(&mut self, _tsize: u64) {}
}
