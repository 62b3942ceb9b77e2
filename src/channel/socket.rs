use super::Channel;
use crate::constants::timeouts;
use crate::errors::ChannelError;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Raw shell over TCP, either connected to a bind shell or accepted from a
/// reverse shell.
pub struct SocketChannel {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl SocketChannel {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let resolved = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ChannelError::Connect(format!("cannot resolve {}", addr)))?;
        let stream = TcpStream::connect_timeout(&resolved, timeout)
            .map_err(|err| ChannelError::Connect(format!("{}: {}", addr, err)))?;
        Self::from_stream(stream)
    }

    /// Waits for exactly one inbound connection.
    pub fn accept(bind: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Self::from_stream(stream);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(ChannelError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(timeouts::CHANNEL_SLICE_MS));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, ChannelError> {
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }
}

impl Channel for SocketChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        // A zero read timeout means "block forever" to the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; max.max(1)];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(ChannelError::Closed),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        match self.peer {
            Some(peer) => format!("tcp://{}", peer),
            None => "tcp".to_string(),
        }
    }
}
