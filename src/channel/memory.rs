use super::Channel;
use crate::errors::ChannelError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Shared view of a [`MemoryChannel`]: feed inbound bytes, inspect what was sent.
#[derive(Clone, Default)]
pub struct MemoryHandle {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryHandle {
    pub fn push(&self, data: &[u8]) {
        if let Ok(mut inbound) = self.inbound.lock() {
            inbound.extend(data.iter().copied());
        }
    }

    /// Everything written to the channel so far.
    pub fn sent(&self) -> Vec<u8> {
        self.outbound
            .lock()
            .map(|out| out.clone())
            .unwrap_or_default()
    }

    pub fn take_sent(&self) -> Vec<u8> {
        self.outbound
            .lock()
            .map(|mut out| std::mem::take(&mut *out))
            .unwrap_or_default()
    }

    /// Once closed, reads fail with `Closed` after the queued input is consumed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-process channel. With a responder every `send` is answered
/// synchronously, which makes it usable as a scripted console.
pub struct MemoryChannel {
    handle: MemoryHandle,
    responder: Option<Responder>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            handle: MemoryHandle::default(),
            responder: None,
        }
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self {
            handle: MemoryHandle::default(),
            responder: Some(Box::new(responder)),
        }
    }

    pub fn handle(&self) -> MemoryHandle {
        self.handle.clone()
    }

    fn pop(&self, max: usize) -> Vec<u8> {
        match self.handle.inbound.lock() {
            Ok(mut inbound) => {
                let count = max.min(inbound.len());
                inbound.drain(..count).collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if self.handle.is_closed() {
            return Err(ChannelError::Closed);
        }
        if let Ok(mut out) = self.handle.outbound.lock() {
            out.extend_from_slice(data);
        }
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(data);
            self.handle.push(&reply);
        }
        Ok(())
    }

    fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            let chunk = self.pop(max);
            if !chunk.is_empty() {
                return Ok(chunk);
            }
            if self.handle.is_closed() {
                return Err(ChannelError::Closed);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
