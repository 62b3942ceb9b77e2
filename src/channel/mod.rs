//! Byte-stream transport primitives.
//!
//! A [`Channel`] only knows how to push bytes out and pull whatever arrived
//! within a deadline. [`Wire`] layers a push-back buffer on top of it so the
//! framing code can search for markers without losing bytes it overshot.

pub mod bounded;
pub mod memory;
pub mod socket;
pub mod ssh;

use crate::constants::limits;
use crate::errors::{ChannelError, TransportError};
use crate::services::logger::Logger;
use crate::utils::text::preview_bytes;
use bytes::{Buf, BytesMut};
use std::time::{Duration, Instant};

pub use bounded::BoundedReader;
pub use memory::{MemoryChannel, MemoryHandle};
pub use socket::SocketChannel;
pub use ssh::{SshChannel, SshTarget};

pub trait Channel: Send {
    fn send(&mut self, data: &[u8]) -> Result<(), ChannelError>;

    /// Returns up to `max` bytes. An empty vector means nothing arrived
    /// before `timeout`; a closed peer is reported as [`ChannelError::Closed`].
    fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError>;

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

pub struct Wire {
    channel: Box<dyn Channel>,
    pending: BytesMut,
    logger: Logger,
}

impl Wire {
    pub fn new(channel: Box<dyn Channel>, logger: Logger) -> Self {
        Self {
            channel,
            pending: BytesMut::new(),
            logger: logger.child("wire"),
        }
    }

    pub fn describe(&self) -> String {
        self.channel.describe()
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.logger.debug(
            "send",
            Some(&serde_json::json!({
                "bytes": data.len(),
                "preview": preview_bytes(data, limits::COMMAND_PREVIEW_BYTES),
            })),
        );
        self.channel.send(data)?;
        Ok(())
    }

    pub fn sendline(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut line = Vec::with_capacity(data.len() + 1);
        line.extend_from_slice(data);
        line.push(b'\n');
        self.send(&line)
    }

    /// Buffered bytes are returned without touching the channel.
    pub fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.pending.is_empty() {
            let take = max.min(self.pending.len());
            return Ok(self.pending.split_to(take).to_vec());
        }
        Ok(self.channel.recv(max, timeout)?)
    }

    /// Pushes bytes back in front of anything still buffered.
    pub fn unread(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut merged = BytesMut::with_capacity(data.len() + self.pending.len());
        merged.extend_from_slice(data);
        merged.extend_from_slice(&self.pending);
        self.pending = merged;
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn fill(&mut self, deadline: Instant) -> Result<usize, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let chunk = self.channel.recv(limits::READ_CHUNK, remaining)?;
        self.pending.extend_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Reads through the first occurrence of `needle`; the needle is included.
    /// On timeout everything read so far stays buffered.
    pub fn recv_until(&mut self, needle: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + timeout;
        let mut searched = 0usize;
        loop {
            if let Some(pos) = find_subslice(&self.pending[searched..], needle) {
                let end = searched + pos + needle.len();
                return Ok(self.pending.split_to(end).to_vec());
            }
            searched = self.pending.len().saturating_sub(needle.len() - 1);
            if Instant::now() >= deadline {
                return Err(TransportError::timeout(format!(
                    "timed out waiting for {:?}",
                    String::from_utf8_lossy(needle)
                ))
                .with_details(serde_json::json!({
                    "buffered": self.pending.len(),
                    "tail": preview_bytes(&self.pending[self.pending.len().saturating_sub(64)..], 64),
                })));
            }
            self.fill(deadline)?;
        }
    }

    pub fn recv_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.recv_until(b"\n", timeout)
    }

    pub fn recv_exact(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < count {
            if Instant::now() >= deadline {
                return Err(TransportError::timeout(format!(
                    "timed out reading {} bytes ({} received)",
                    count,
                    self.pending.len()
                )));
            }
            self.fill(deadline)?;
        }
        Ok(self.pending.split_to(count).to_vec())
    }

    /// Discards input until the channel stays silent for `quiet`.
    pub fn drain(&mut self, quiet: Duration) -> Result<usize, TransportError> {
        let mut discarded = self.pending.len();
        self.pending.advance(self.pending.len());
        loop {
            let chunk = self.channel.recv(limits::READ_CHUNK, quiet)?;
            if chunk.is_empty() {
                return Ok(discarded);
            }
            discarded += chunk.len();
        }
    }
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
