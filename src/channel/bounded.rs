//! A readable window of the channel bounded by a start and an end marker.
//!
//! Markers are random tokens terminated by `\n` (or `\r\n` on a TTY). Bytes
//! before the start marker are discarded, bytes between the markers are
//! output, and anything after the end marker is pushed back onto the wire.
//! A tail that could still turn into a marker is held back until more data
//! arrives, so marker text never leaks into the output.

use super::Wire;
use crate::constants::limits;
use crate::errors::TransportError;
use bytes::{Buf, BytesMut};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerScan {
    Found { at: usize, len: usize },
    Partial { at: usize },
    Absent,
}

/// Finds the earliest full or partial `token` + line terminator in `haystack`.
pub fn scan_marker(haystack: &[u8], token: &[u8]) -> MarkerScan {
    let Some(&first) = token.first() else {
        return MarkerScan::Absent;
    };
    for at in 0..haystack.len() {
        if haystack[at] != first {
            continue;
        }
        let rest = &haystack[at..];
        if rest.len() < token.len() {
            if token.starts_with(rest) {
                return MarkerScan::Partial { at };
            }
            continue;
        }
        if !rest.starts_with(token) {
            continue;
        }
        match &rest[token.len()..] {
            [] | [b'\r'] => return MarkerScan::Partial { at },
            [b'\n', ..] => {
                return MarkerScan::Found {
                    at,
                    len: token.len() + 1,
                }
            }
            [b'\r', b'\n', ..] => {
                return MarkerScan::Found {
                    at,
                    len: token.len() + 2,
                }
            }
            _ => continue,
        }
    }
    MarkerScan::Absent
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitStart,
    Body,
    Ended,
}

#[derive(Debug)]
pub struct BoundedReader {
    start: Vec<u8>,
    end: Vec<u8>,
    phase: Phase,
    scan: BytesMut,
    ready: BytesMut,
}

impl BoundedReader {
    pub fn new(start: &[u8], end: &[u8]) -> Self {
        Self {
            start: start.to_vec(),
            end: end.to_vec(),
            phase: Phase::AwaitStart,
            scan: BytesMut::new(),
            ready: BytesMut::new(),
        }
    }

    /// Pulls one chunk from the wire. Returns whether anything arrived.
    pub fn pump(&mut self, wire: &mut Wire, timeout: Duration) -> Result<bool, TransportError> {
        if self.phase == Phase::Ended {
            return Ok(false);
        }
        let chunk = wire.recv(limits::READ_CHUNK, timeout)?;
        if chunk.is_empty() {
            return Ok(false);
        }
        self.feed(&chunk, wire);
        Ok(true)
    }

    fn feed(&mut self, data: &[u8], wire: &mut Wire) {
        self.scan.extend_from_slice(data);
        loop {
            match self.phase {
                Phase::AwaitStart => match scan_marker(&self.scan, &self.start) {
                    MarkerScan::Found { at, len } => {
                        self.scan.advance(at + len);
                        self.phase = Phase::Body;
                    }
                    MarkerScan::Partial { at } => {
                        self.scan.advance(at);
                        return;
                    }
                    MarkerScan::Absent => {
                        self.scan.clear();
                        return;
                    }
                },
                Phase::Body => match scan_marker(&self.scan, &self.end) {
                    MarkerScan::Found { at, len } => {
                        let body = self.scan.split_to(at);
                        self.ready.extend_from_slice(&body);
                        self.scan.advance(len);
                        wire.unread(&self.scan);
                        self.scan.clear();
                        self.phase = Phase::Ended;
                        return;
                    }
                    MarkerScan::Partial { at } => {
                        let body = self.scan.split_to(at);
                        self.ready.extend_from_slice(&body);
                        return;
                    }
                    MarkerScan::Absent => {
                        let body = self.scan.split();
                        self.ready.extend_from_slice(&body);
                        return;
                    }
                },
                Phase::Ended => return,
            }
        }
    }

    /// Takes up to `max` confirmed output bytes.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let count = max.min(self.ready.len());
        self.ready.split_to(count).to_vec()
    }

    pub fn take_all(&mut self) -> Vec<u8> {
        self.ready.split().to_vec()
    }

    pub fn buffered(&self) -> usize {
        self.ready.len()
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    pub fn has_started(&self) -> bool {
        self.phase != Phase::AwaitStart
    }

    /// End marker seen and every output byte handed out.
    pub fn at_eof(&self) -> bool {
        self.is_ended() && self.ready.is_empty()
    }
}
