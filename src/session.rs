//! Session core (C3): the lock-step DATA/ACK state machine, on both the
//! read and write side, including retransmission and block-number
//! rollover (spec §4.3).

use std::net::SocketAddr;

use bytes::Bytes;
use log::{trace, warn};
use tokio::time::Duration;

use crate::backing::{Reader, Writer};
use crate::codec::{self, Packet};
use crate::error::Error;
use crate::negotiate::NegotiatedOptions;
use crate::transport::{self, Transport};

enum ReadOutcome {
    Acked,
    Terminated,
}

enum WriteOutcome {
    Received(Bytes),
    Terminated,
}

/// Drives a read transfer: fetches blocks from `reader`, sends `DATA`,
/// and waits for the matching `ACK` (spec §4.3 "Read side").
pub struct ReadSession {
    transport: Box<dyn Transport>,
    remote: SocketAddr,
    reader: Box<dyn Reader>,
    block_size: usize,
    timeout: Vec<Duration>,
    started: bool,
    completed: bool,
}

impl ReadSession {
    pub fn new(
        transport: Box<dyn Transport>,
        remote: SocketAddr,
        reader: Box<dyn Reader>,
        negotiated: &NegotiatedOptions,
    ) -> Self {
        ReadSession {
            transport,
            remote,
            reader,
            block_size: negotiated.block_size,
            timeout: negotiated.timeout.clone(),
            started: false,
            completed: false,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Runs the transfer to completion (normal finish, timeout, or
    /// termination by peer `ERROR`).
    pub async fn run(mut self) -> Result<(), Error> {
        let mut block: u16 = 1;
        loop {
            let payload = self.reader.read_block(block, self.block_size).await?;
            let is_last = payload.len() < self.block_size;

            match self.send_until_acked(block, payload).await? {
                ReadOutcome::Terminated => return Ok(()),
                ReadOutcome::Acked => {}
            }
            self.started = true;

            if is_last {
                self.completed = true;
                return Ok(());
            }
            block = block.wrapping_add(1);
        }
    }

    async fn send_until_acked(&mut self, block: u16, payload: Bytes) -> Result<ReadOutcome, Error> {
        let mut attempt = 0usize;
        loop {
            self.transport
                .send_to(
                    codec::encode(&Packet::Data {
                        block,
                        payload: payload.clone(),
                    }),
                    self.remote,
                )
                .await?;
            trace!("sent DATA block {block} ({} bytes)", payload.len());

            let deadline = self.timeout[attempt];
            match tokio::time::timeout(deadline, self.await_ack(block)).await {
                Ok(result) => return result,
                Err(_elapsed) => {
                    attempt += 1;
                    warn!("timed out waiting for ACK({block}), attempt {attempt}");
                    if attempt >= self.timeout.len() {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Waits for `ACK(block)`, silently ignoring duplicates and anything
    /// else — the caller's outer timeout is what eventually gives up
    /// (spec §4.3 "ignore (do not reset the timer)").
    async fn await_ack(&mut self, block: u16) -> Result<ReadOutcome, Error> {
        loop {
            let buf = transport::recv_guarded(self.transport.as_ref(), self.remote).await?;
            match codec::decode(&buf) {
                Ok(Packet::Ack { block: acked }) if acked == block => {
                    trace!("received ACK({acked})");
                    return Ok(ReadOutcome::Acked);
                }
                Ok(Packet::Error { code, message }) => {
                    warn!(
                        "peer sent ERROR({code:?}): {}",
                        String::from_utf8_lossy(&message)
                    );
                    return Ok(ReadOutcome::Terminated);
                }
                _ => continue,
            }
        }
    }
}

/// Drives a write transfer: waits for `DATA`, hands payloads to `writer`,
/// and acknowledges each block (spec §4.3 "Write side").
pub struct WriteSession {
    transport: Box<dyn Transport>,
    remote: SocketAddr,
    writer: Box<dyn Writer>,
    block_size: usize,
    timeout: Vec<Duration>,
    /// Last block number acknowledged; starts at 0, the block number the
    /// WRQ/OACK handshake itself acknowledges (spec §3 "Session").
    last_acked: u16,
    started: bool,
    completed: bool,
}

impl WriteSession {
    pub fn new(
        transport: Box<dyn Transport>,
        remote: SocketAddr,
        writer: Box<dyn Writer>,
        negotiated: &NegotiatedOptions,
    ) -> Self {
        WriteSession {
            transport,
            remote,
            writer,
            block_size: negotiated.block_size,
            timeout: negotiated.timeout.clone(),
            last_acked: 0,
            started: false,
            completed: false,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub async fn run(self) -> Result<(), Error> {
        self.run_seeded(None).await
    }

    /// Runs the transfer, treating `seed` (if given) as an already-received
    /// datagram standing in for the first `recv` — used by the bootstrap
    /// layer when a peer skips straight from OACK negotiation to DATA(1)
    /// instead of separately acknowledging the handshake (spec §4.4).
    pub(crate) async fn run_seeded(mut self, seed: Option<Bytes>) -> Result<(), Error> {
        let mut pending = seed;
        loop {
            let expected = self.last_acked.wrapping_add(1);
            let outcome = match pending.take() {
                Some(buf) => match codec::decode(&buf) {
                    Ok(Packet::Data { block, payload }) if block == expected => {
                        WriteOutcome::Received(payload)
                    }
                    _ => self.recv_until_acked(expected).await?,
                },
                None => self.recv_until_acked(expected).await?,
            };
            match outcome {
                WriteOutcome::Terminated => return Ok(()),
                WriteOutcome::Received(payload) => {
                    let is_last = payload.len() < self.block_size;
                    self.writer.write_block(expected, payload).await?;
                    if is_last {
                        self.writer.finish().await?;
                    }
                    self.last_acked = expected;
                    self.started = true;
                    self.transport
                        .send_to(
                            codec::encode(&Packet::Ack { block: expected }),
                            self.remote,
                        )
                        .await?;
                    trace!("acked DATA block {expected}");

                    if is_last {
                        self.completed = true;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn recv_until_acked(&mut self, expected: u16) -> Result<WriteOutcome, Error> {
        let mut attempt = 0usize;
        loop {
            let deadline = self.timeout[attempt];
            match tokio::time::timeout(deadline, self.await_data(expected)).await {
                Ok(result) => return result,
                Err(_elapsed) => {
                    attempt += 1;
                    warn!("timed out waiting for DATA({expected}), attempt {attempt}");
                    // Peer likely missed our ACK; resend the last one as a
                    // nudge (spec §4.3 Retransmission applies symmetrically).
                    self.transport
                        .send_to(
                            codec::encode(&Packet::Ack {
                                block: self.last_acked,
                            }),
                            self.remote,
                        )
                        .await?;
                    if attempt >= self.timeout.len() {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    async fn await_data(&mut self, expected: u16) -> Result<WriteOutcome, Error> {
        loop {
            let buf = transport::recv_guarded(self.transport.as_ref(), self.remote).await?;
            match codec::decode(&buf) {
                Ok(Packet::Data { block, payload }) if block == expected => {
                    trace!("received DATA({block}, {} bytes)", payload.len());
                    return Ok(WriteOutcome::Received(payload));
                }
                Ok(Packet::Data { block, payload }) if block == self.last_acked => {
                    // Duplicate of the already-acked block: resend the ACK,
                    // never re-invoke the writer (sorcerer's-apprentice).
                    trace!("received duplicate DATA({block}, {} bytes)", payload.len());
                    self.transport
                        .send_to(
                            codec::encode(&Packet::Ack {
                                block: self.last_acked,
                            }),
                            self.remote,
                        )
                        .await?;
                }
                Ok(Packet::Error { code, message }) => {
                    warn!(
                        "peer sent ERROR({code:?}): {}",
                        String::from_utf8_lossy(&message)
                    );
                    return Ok(WriteOutcome::Terminated);
                }
                _ => {}
            }
        }
    }
}
